//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 제품, 스캔 이벤트, 위조 인시던트, 제조사 리포트 엔트리를 정의합니다.
//! [`Product`]가 자신의 스캔/인시던트 시퀀스를 독점 소유하며,
//! [`ManufacturerReportEntry`]는 역참조용 읽기 모델일 뿐 원본 데이터가 아닙니다.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 등록된 제품
///
/// 식별 필드(code, name, batch_id, 제조/만료 시각, manufacturer_id)는
/// 등록 이후 변경되지 않습니다. 스캔과 인시던트는 추가만 되며 삭제되지 않습니다.
///
/// 불변식: `counterfeit == true` ⟺ `incidents`가 비어있지 않음
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// 전역 고유 제품 코드
    pub code: String,
    /// 제품명
    pub name: String,
    /// 배치 식별자
    pub batch_id: String,
    /// 제조 시각 (epoch seconds)
    pub manufactured_at: i64,
    /// 만료 시각 (epoch seconds)
    pub expires_at: i64,
    /// 소유 제조사 ID
    pub manufacturer_id: String,
    /// 위조 판정 플래그 (false -> true 단방향)
    #[serde(default)]
    pub counterfeit: bool,
    /// 스캔 이력 (추가 순서 == 시간 순서)
    #[serde(default)]
    pub scans: Vec<ScanEvent>,
    /// 위조 인시던트 이력
    #[serde(default)]
    pub incidents: Vec<FraudIncident>,
}

impl Product {
    /// 스캔/인시던트 이력이 없는 새 제품을 생성합니다.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        batch_id: impl Into<String>,
        manufacturer_id: impl Into<String>,
        manufactured_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            batch_id: batch_id.into(),
            manufactured_at,
            expires_at,
            manufacturer_id: manufacturer_id.into(),
            counterfeit: false,
            scans: Vec::new(),
            incidents: Vec::new(),
        }
    }

    /// 주어진 행위자가 이 제품의 제조사인지 확인합니다.
    pub fn is_owned_by(&self, actor: &str) -> bool {
        self.manufacturer_id == actor
    }

    /// 원장 확정 전(Pending/Failed) 인시던트를 반환합니다.
    pub fn open_incident(&self) -> Option<&FraudIncident> {
        self.incidents.iter().find(|i| i.is_open())
    }

    /// ID로 인시던트를 찾습니다.
    pub fn incident(&self, incident_id: &str) -> Option<&FraudIncident> {
        self.incidents.iter().find(|i| i.id == incident_id)
    }

    /// 마지막으로 추가된 스캔을 반환합니다.
    pub fn last_scan(&self) -> Option<&ScanEvent> {
        self.scans.last()
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) batch={} scans={} counterfeit={}",
            self.code,
            self.name,
            self.batch_id,
            self.scans.len(),
            self.counterfeit,
        )
    }
}

/// 스캔 이벤트: 추가된 이후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// 스캔 시각
    pub occurred_at: DateTime<Utc>,
    /// 스캔 위치 (원문 그대로 보존)
    pub location: String,
    /// 스캔한 사용자 ID (익명 스캔은 None)
    pub actor: Option<String>,
}

impl ScanEvent {
    /// 새 스캔 이벤트를 생성합니다.
    pub fn new(
        occurred_at: DateTime<Utc>,
        location: impl Into<String>,
        actor: Option<String>,
    ) -> Self {
        Self {
            occurred_at,
            location: location.into(),
            actor,
        }
    }
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}",
            self.occurred_at.to_rfc3339(),
            self.location
        )?;
        if let Some(actor) = &self.actor {
            write!(f, " by {actor}")?;
        }
        Ok(())
    }
}

/// 인시던트의 원장 반영 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// 원장 제출 대기/진행 중
    #[default]
    Pending,
    /// 원장에 수용됨 (종료 상태)
    Confirmed,
    /// 재시도 소진 또는 거부됨: 수동/예약 재조정 대상
    Failed,
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 원장 실패 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFailureKind {
    /// 일시적 장애로 재시도가 소진됨
    Unavailable,
    /// 원장이 페이로드를 거부함 (재시도 불가)
    Rejected,
}

/// 마지막 원장 실패 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerErrorRecord {
    /// 실패 유형
    pub kind: LedgerFailureKind,
    /// 실패 메시지
    pub message: String,
}

/// 위조 인시던트
///
/// `detected_at`, `scan_count`, `distinct_locations`는 생성 이후 변경되지 않으며,
/// 원장 페이로드는 이 필드들만으로 결정됩니다. 원장 추적 필드
/// (`ledger_ref`, `ledger_status`, `ledger_attempts`, `last_ledger_error`)만 갱신됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudIncident {
    /// 인시던트 ID (UUID v4)
    pub id: String,
    /// 탐지 시각
    pub detected_at: DateTime<Utc>,
    /// 탐지 윈도우 내 스캔 수
    pub scan_count: usize,
    /// 탐지 윈도우 내 고유 위치 집합 (정렬됨)
    pub distinct_locations: BTreeSet<String>,
    /// 원장 참조 (확정 시 설정)
    #[serde(default)]
    pub ledger_ref: Option<String>,
    /// 원장 반영 상태
    #[serde(default)]
    pub ledger_status: LedgerStatus,
    /// 누적 원장 제출 시도 횟수
    #[serde(default)]
    pub ledger_attempts: u32,
    /// 마지막 원장 실패
    #[serde(default)]
    pub last_ledger_error: Option<LedgerErrorRecord>,
}

impl FraudIncident {
    /// 원장 상태가 Pending인 새 인시던트를 생성합니다.
    pub fn new(
        detected_at: DateTime<Utc>,
        scan_count: usize,
        distinct_locations: BTreeSet<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            detected_at,
            scan_count,
            distinct_locations,
            ledger_ref: None,
            ledger_status: LedgerStatus::Pending,
            ledger_attempts: 0,
            last_ledger_error: None,
        }
    }

    /// 원장 확정 전인지 확인합니다.
    pub fn is_open(&self) -> bool {
        self.ledger_status != LedgerStatus::Confirmed
    }

    /// 원장이 거부하여 실패한 인시던트인지 확인합니다.
    pub fn is_rejected(&self) -> bool {
        self.ledger_status == LedgerStatus::Failed
            && self
                .last_ledger_error
                .as_ref()
                .is_some_and(|e| e.kind == LedgerFailureKind::Rejected)
    }
}

impl fmt::Display for FraudIncident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "incident {} scans={} locations={} ledger={}",
            &self.id[..8.min(self.id.len())],
            self.scan_count,
            self.distinct_locations.len(),
            self.ledger_status,
        )
    }
}

/// 제조사 리포트 엔트리: 제조사별 리포트 목록의 읽기 모델
///
/// 인시던트 생성 시점에 추가되며 원장 확정 여부와 무관합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerReportEntry {
    /// 대상 제품 코드
    pub product_code: String,
    /// 인시던트 ID
    pub incident_id: String,
    /// 탐지 시각
    pub detected_at: DateTime<Utc>,
}
