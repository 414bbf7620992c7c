//! 원장 연동 -- 외부 추가 전용 원장에 대한 좁은 인터페이스
//!
//! [`LedgerClient`]는 인시던트 요약을 제출하고 원장 참조로 조회하는 계약입니다.
//! `submit`의 성공 반환은 "포함 대상으로 수락됨"을 의미하며 최종 확정이 아닙니다.
//!
//! # 구현
//! - [`FileLedger`]: 로컬 해시 체인 JSONL 파일
//! - [`HttpLedgerClient`]: 원격 HTTP 원장
//! - [`LedgerBackend`]: 설정(`[ledger] backend`)으로 선택하는 위 두 구현의 합
//!
//! ```text
//! FraudIncident ──LedgerPayload::from_incident──> canonical JSON ──sha256──> content_hash
//!                                                       │
//!                                               LedgerClient::submit ──> LedgerRef
//! ```

mod file;
mod http;

use std::fmt;
use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use scanguard_core::config::{LEDGER_BACKEND_FILE, LEDGER_BACKEND_HTTP, LedgerConfig};
use scanguard_core::types::FraudIncident;

use crate::error::{LedgerError, VerifierError};

pub use file::{ChainVerification, FileLedger};
pub use http::HttpLedgerClient;

/// 자동 탐지 인시던트의 원장 사유 코드
pub const REASON_SCAN_ANOMALY: &str = "scan_anomaly";

/// 원장 참조 (불투명 식별자)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerRef(pub String);

impl LedgerRef {
    /// 참조 문자열
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LedgerRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 원장에 기록되는 인시던트 요약
///
/// 인시던트의 불변 필드만으로 결정되므로 재시도마다 바이트 단위로 동일합니다.
/// 필드 순서가 직렬화 순서입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPayload {
    /// 인시던트 ID
    pub incident_id: String,
    /// 제품 코드
    pub product_code: String,
    /// 사유 코드
    pub reason: String,
    /// 윈도우 내 스캔 수
    pub scan_count: usize,
    /// 고유 위치 목록 (정렬됨)
    pub location_summary: Vec<String>,
    /// 탐지 시각 (epoch seconds)
    pub detected_at: i64,
}

impl LedgerPayload {
    /// 인시던트에서 페이로드를 생성합니다.
    pub fn from_incident(product_code: &str, incident: &FraudIncident) -> Self {
        Self {
            incident_id: incident.id.clone(),
            product_code: product_code.to_owned(),
            reason: REASON_SCAN_ANOMALY.to_owned(),
            scan_count: incident.scan_count,
            // BTreeSet 순회는 정렬 순서
            location_summary: incident.distinct_locations.iter().cloned().collect(),
            detected_at: incident.detected_at.timestamp(),
        }
    }

    /// 정규화된 JSON 바이트
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self)
            .map_err(|e| LedgerError::Rejected(format!("payload serialization failed: {e}")))
    }

    /// 정규화된 JSON의 SHA-256 (hex)
    pub fn content_hash(&self) -> Result<String, LedgerError> {
        let bytes = self.canonical_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// 원장 레코드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRecordStatus {
    /// 수락되었으나 아직 최종 확정 전
    Pending,
    /// 최종 확정
    Final,
}

impl fmt::Display for LedgerRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Final => write!(f, "final"),
        }
    }
}

/// 원장 조회 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// 원장 참조
    pub ledger_ref: LedgerRef,
    /// 레코드 상태
    pub status: LedgerRecordStatus,
    /// 원장이 기록한 페이로드 해시 (제공되는 경우)
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// 원장 클라이언트 계약
pub trait LedgerClient: Send + Sync + 'static {
    /// 페이로드를 제출하고 원장 참조를 받습니다.
    fn submit(
        &self,
        payload: &LedgerPayload,
    ) -> impl Future<Output = Result<LedgerRef, LedgerError>> + Send;

    /// 원장 참조로 레코드 상태를 조회합니다.
    fn query(
        &self,
        ledger_ref: &LedgerRef,
    ) -> impl Future<Output = Result<LedgerRecord, LedgerError>> + Send;

    /// 백엔드 이름 (로그용)
    fn backend_name(&self) -> &'static str;
}

/// 설정으로 선택되는 원장 백엔드
#[derive(Debug)]
pub enum LedgerBackend {
    /// 로컬 해시 체인 파일
    File(FileLedger),
    /// 원격 HTTP 원장
    Http(HttpLedgerClient),
}

impl LedgerBackend {
    /// `[ledger]` 설정에서 백엔드를 생성합니다.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self, VerifierError> {
        match config.backend.as_str() {
            LEDGER_BACKEND_FILE => {
                let ledger = FileLedger::open(Path::new(&config.file_path)).await?;
                Ok(Self::File(ledger))
            }
            LEDGER_BACKEND_HTTP => Ok(Self::Http(HttpLedgerClient::from_config(config)?)),
            other => Err(VerifierError::Config {
                field: "ledger.backend".to_owned(),
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }

    /// 로컬 파일 원장이면 해시 체인을 검증합니다. 원격 원장은 None.
    pub async fn verify_chain(&self) -> Result<Option<ChainVerification>, LedgerError> {
        match self {
            Self::File(ledger) => ledger.verify_chain().await.map(Some),
            Self::Http(_) => Ok(None),
        }
    }
}

impl LedgerClient for LedgerBackend {
    async fn submit(&self, payload: &LedgerPayload) -> Result<LedgerRef, LedgerError> {
        match self {
            Self::File(ledger) => ledger.submit(payload).await,
            Self::Http(client) => client.submit(payload).await,
        }
    }

    async fn query(&self, ledger_ref: &LedgerRef) -> Result<LedgerRecord, LedgerError> {
        match self {
            Self::File(ledger) => ledger.query(ledger_ref).await,
            Self::Http(client) => client.query(ledger_ref).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::File(ledger) => ledger.backend_name(),
            Self::Http(client) => client.backend_name(),
        }
    }
}
