//! 에러 타입: 도메인별 에러 정의

/// Scanguard 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ScanguardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 도메인 규칙 위반 (존재하지 않는 제품, 권한 위반 등)
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 원장(ledger) 연동 에러
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerFailure),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanguardError {
    /// 호출자에게 그대로 보고해야 하는 NotFound 에러인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Domain(DomainError::NotFound { .. }))
    }

    /// 역할 위반(Forbidden) 에러인지 확인합니다.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Domain(DomainError::Forbidden(_)))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 도메인 규칙 에러
///
/// `NotFound`와 `Forbidden`은 호출자에게 전달되는 종료 에러이고,
/// `Conflict`는 동시 인시던트 경합에서만 발생하며 내부에서 흡수됩니다.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// 알 수 없는 제품 코드 또는 제조사
    #[error("{kind} not found: {id}")]
    NotFound {
        /// 대상 종류 (product, manufacturer, incident)
        kind: String,
        /// 조회한 식별자
        id: String,
    },

    /// 역할 위반 (제조사가 자기 제품을 스캔하는 경우 등)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 동시 갱신 충돌
    #[error("conflict: {0}")]
    Conflict(String),
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 스냅샷 읽기/쓰기 실패
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// 저장된 데이터가 손상됨
    #[error("corrupt state: {0}")]
    Corrupt(String),
}

/// 원장 연동 실패
#[derive(Debug, thiserror::Error)]
pub enum LedgerFailure {
    /// 일시적 장애 (재시도 대상)
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// 페이로드 거부 (재시도 불가)
    #[error("ledger rejected payload: {0}")]
    Rejected(String),
}
