//! # scanguard-core
//!
//! Scanguard 워크스페이스의 공통 기반 크레이트입니다.
//!
//! - [`types`]: 제품, 스캔 이벤트, 위조 인시던트, 제조사 리포트 엔트리
//! - [`event`]: 스캔 코디네이터와 원장 워커 사이의 이벤트
//! - [`error`]: 최상위 에러 타입과 도메인별 에러
//! - [`config`]: `scanguard.toml` 설정 로딩, 환경변수 오버라이드, 검증
//! - [`pipeline`]: 백그라운드 컴포넌트의 생명주기 trait
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    ConfigError, DomainError, LedgerFailure, PipelineError, ScanguardError, StorageError,
};

// 설정
pub use config::{DetectionConfig, GeneralConfig, LedgerConfig, ScanguardConfig};

// 이벤트
pub use event::{Event, EventMetadata, IncidentEvent, LedgerEvent, LedgerOutcome};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 도메인 타입
pub use types::{
    FraudIncident, LedgerErrorRecord, LedgerFailureKind, LedgerStatus, ManufacturerReportEntry,
    Product, ScanEvent,
};
