//! 검증기 에러 타입
//!
//! [`VerifierError`]는 스캔 검증 파이프라인 내부의 모든 에러를 표현합니다.
//! 컴포넌트별 에러([`StoreError`], [`LedgerError`], [`NotifierError`])는
//! `From` 변환으로 [`VerifierError`]와 core의 [`ScanguardError`]로 전파됩니다.

use scanguard_core::error::{
    ConfigError, DomainError, LedgerFailure, PipelineError, ScanguardError, StorageError,
};

/// 스캔 저장소 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// 알 수 없는 제품 코드
    #[error("product not found: {0}")]
    ProductNotFound(String),

    /// 알 수 없는 인시던트
    #[error("incident not found: {incident_id} (product {product_code})")]
    IncidentNotFound {
        /// 제품 코드
        product_code: String,
        /// 인시던트 ID
        incident_id: String,
    },

    /// 조건부 갱신 충돌 (중복 제품 코드, 이미 위조로 표시된 제품)
    #[error("conflict on product '{code}': {reason}")]
    Conflict {
        /// 제품 코드
        code: String,
        /// 충돌 사유
        reason: String,
    },

    /// 복원한 상태가 불변식을 위반함
    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// 충돌 에러인지 확인합니다.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// 원장 클라이언트 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// 일시적 장애 (재시도 대상)
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// 페이로드 거부 (재시도 불가, 운영자 알림 대상)
    #[error("ledger rejected payload: {0}")]
    Rejected(String),

    /// 존재하지 않는 원장 참조
    #[error("ledger record not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// 재시도하면 성공할 수 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// 제조사 리포트 알림 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifierError {
    /// 등록되지 않은 제조사
    #[error("manufacturer not found: {0}")]
    UnknownManufacturer(String),
}

/// 검증기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// 저장소 에러
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 원장 에러
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// 리포트 알림 에러
    #[error(transparent)]
    Notifier(#[from] NotifierError),

    /// 제조사가 자기 제품을 스캔함
    #[error("forbidden: manufacturer '{actor}' may not scan own product '{product_code}'")]
    Forbidden {
        /// 스캔을 시도한 행위자
        actor: String,
        /// 대상 제품 코드
        product_code: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 상태 스냅샷 읽기/쓰기 실패
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ScanguardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(code) => ScanguardError::Domain(DomainError::NotFound {
                kind: "product".to_owned(),
                id: code,
            }),
            StoreError::IncidentNotFound { incident_id, .. } => {
                ScanguardError::Domain(DomainError::NotFound {
                    kind: "incident".to_owned(),
                    id: incident_id,
                })
            }
            StoreError::Conflict { code, reason } => {
                ScanguardError::Domain(DomainError::Conflict(format!("{code}: {reason}")))
            }
            StoreError::Corrupt(msg) => ScanguardError::Storage(StorageError::Corrupt(msg)),
        }
    }
}

impl From<LedgerError> for ScanguardError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(msg) => {
                ScanguardError::Ledger(LedgerFailure::Unavailable(msg))
            }
            LedgerError::Rejected(msg) => ScanguardError::Ledger(LedgerFailure::Rejected(msg)),
            LedgerError::NotFound(ledger_ref) => ScanguardError::Domain(DomainError::NotFound {
                kind: "ledger record".to_owned(),
                id: ledger_ref,
            }),
        }
    }
}

impl From<NotifierError> for ScanguardError {
    fn from(err: NotifierError) -> Self {
        match err {
            NotifierError::UnknownManufacturer(id) => {
                ScanguardError::Domain(DomainError::NotFound {
                    kind: "manufacturer".to_owned(),
                    id,
                })
            }
        }
    }
}

impl From<VerifierError> for ScanguardError {
    fn from(err: VerifierError) -> Self {
        match err {
            VerifierError::Store(e) => e.into(),
            VerifierError::Ledger(e) => e.into(),
            VerifierError::Notifier(e) => e.into(),
            VerifierError::Forbidden {
                actor,
                product_code,
            } => ScanguardError::Domain(DomainError::Forbidden(format!(
                "manufacturer '{actor}' may not scan own product '{product_code}'"
            ))),
            VerifierError::Config { field, reason } => {
                ScanguardError::Config(ConfigError::InvalidValue { field, reason })
            }
            VerifierError::Snapshot(msg) => ScanguardError::Storage(StorageError::Snapshot(msg)),
            VerifierError::Channel(msg) => ScanguardError::Pipeline(PipelineError::ChannelSend(msg)),
            VerifierError::Io(e) => ScanguardError::Io(e),
        }
    }
}
