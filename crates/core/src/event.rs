//! 이벤트 시스템: 컴포넌트 간 통신의 기본 단위
//!
//! 스캔 코디네이터와 원장 워커 사이의 통신은 이벤트 기반 메시지 패싱으로 수행됩니다.
//! [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는 메타데이터이며,
//! [`Event`] trait은 모든 이벤트 타입이 구현해야 하는 인터페이스입니다.
//!
//! ```text
//! ScanCoordinator ──IncidentEvent──> LedgerWorker ──LedgerEvent──> downstream
//! ```

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{FraudIncident, LedgerFailureKind};

// --- 모듈명 상수 ---

/// 스캔 코디네이터 모듈명
pub const MODULE_COORDINATOR: &str = "scan-coordinator";
/// 원장 워커 모듈명
pub const MODULE_LEDGER_WORKER: &str = "ledger-worker";
/// 재조정기 모듈명
pub const MODULE_RECONCILER: &str = "reconciler";

// --- 이벤트 타입 상수 ---

/// 인시던트 발생 이벤트 타입
pub const EVENT_TYPE_INCIDENT: &str = "incident";
/// 원장 처리 결과 이벤트 타입
pub const EVENT_TYPE_LEDGER: &str = "ledger";

/// 이벤트 메타데이터: 모든 이벤트에 공통으로 포함되는 추적 정보
///
/// 발생 시각, 생성 모듈, 추적 ID를 담아 스캔 요청부터 원장 확정까지의
/// 흐름을 하나의 trace로 연결합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 분산 추적 ID
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        write!(
            f,
            "[{}] source={} trace={}",
            secs, self.source_module, self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현해야 하는 기본 trait
///
/// `Send + Sync + 'static` 바운드로 `tokio::mpsc` 채널을 통한 전송을 보장합니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID (UUID v4)
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입명 (로깅 및 라우팅에 사용)
    fn event_type(&self) -> &str;
}

/// 위조 인시던트 발생 이벤트
///
/// 인시던트 경합에서 이긴 스캔 요청이 로컬 저장을 마친 뒤 원장 워커로 전달합니다.
/// 재조정기도 미확정 인시던트를 다시 제출할 때 같은 이벤트를 사용합니다.
#[derive(Debug, Clone)]
pub struct IncidentEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 대상 제품 코드
    pub product_code: String,
    /// 로컬에 저장된 인시던트 (불변 필드 기준으로 페이로드가 결정됨)
    pub incident: FraudIncident,
}

impl IncidentEvent {
    /// 새로운 trace를 시작하는 인시던트 이벤트를 생성합니다.
    pub fn new(product_code: impl Into<String>, incident: FraudIncident) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_COORDINATOR),
            product_code: product_code.into(),
            incident,
        }
    }

    /// 기존 trace에 연결된 인시던트 이벤트를 생성합니다.
    pub fn with_trace(
        source_module: &str,
        product_code: impl Into<String>,
        incident: FraudIncident,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(source_module, trace_id),
            product_code: product_code.into(),
            incident,
        }
    }
}

impl Event for IncidentEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_INCIDENT
    }
}

impl fmt::Display for IncidentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IncidentEvent[{}] product={} {}",
            &self.id[..8.min(self.id.len())],
            self.product_code,
            self.incident,
        )
    }
}

/// 원장 제출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// 원장에 수용됨
    Confirmed {
        /// 원장 참조
        ledger_ref: String,
    },
    /// 최종 실패 (재시도 소진 또는 거부)
    Failed {
        /// 실패 유형
        kind: LedgerFailureKind,
        /// 실패 사유
        reason: String,
    },
}

/// 원장 처리 결과 이벤트
///
/// 성공/실패와 무관하게 인시던트당 한 번 전송됩니다.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 대상 제품 코드
    pub product_code: String,
    /// 인시던트 ID
    pub incident_id: String,
    /// 이번 제출에서 사용한 시도 횟수
    pub attempts: u32,
    /// 처리 결과
    pub outcome: LedgerOutcome,
}

impl LedgerEvent {
    /// 인시던트 이벤트의 trace에 연결된 결과 이벤트를 생성합니다.
    pub fn for_incident(source: &IncidentEvent, attempts: u32, outcome: LedgerOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_LEDGER_WORKER, source.metadata.trace_id.clone()),
            product_code: source.product_code.clone(),
            incident_id: source.incident.id.clone(),
            attempts,
            outcome,
        }
    }

    /// 원장 확정 여부
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, LedgerOutcome::Confirmed { .. })
    }
}

impl Event for LedgerEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_LEDGER
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.outcome {
            LedgerOutcome::Confirmed { ledger_ref } => format!("CONFIRMED ref={ledger_ref}"),
            LedgerOutcome::Failed { kind, reason } => format!("FAILED {kind:?}: {reason}"),
        };
        write!(
            f,
            "LedgerEvent[{}] product={} attempts={} {}",
            &self.id[..8.min(self.id.len())],
            self.product_code,
            self.attempts,
            status,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::*;

    fn sample_incident() -> FraudIncident {
        FraudIncident::new(
            Utc::now(),
            11,
            BTreeSet::from(["Seoul".to_owned(), "Busan".to_owned()]),
        )
    }

    #[test]
    fn event_metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("test-module", "trace-abc-123");
        assert_eq!(meta.source_module, "test-module");
        assert_eq!(meta.trace_id, "trace-abc-123");
        assert!(meta.timestamp <= SystemTime::now());
    }

    #[test]
    fn event_metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace("test-module");
        // UUID v4 형식 확인: 8-4-4-4-12
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn incident_event_implements_event_trait() {
        let event = IncidentEvent::new("P1", sample_incident());
        assert_eq!(event.event_type(), "incident");
        assert!(!event.event_id().is_empty());
        assert_eq!(event.metadata().source_module, MODULE_COORDINATOR);
    }

    #[test]
    fn ledger_event_inherits_incident_trace() {
        let incident_event = IncidentEvent::with_trace(
            MODULE_RECONCILER,
            "P1",
            sample_incident(),
            "trace-from-scan",
        );
        let ledger_event = LedgerEvent::for_incident(
            &incident_event,
            3,
            LedgerOutcome::Confirmed {
                ledger_ref: "ref-1".to_owned(),
            },
        );
        assert_eq!(ledger_event.metadata().trace_id, "trace-from-scan");
        assert_eq!(ledger_event.incident_id, incident_event.incident.id);
        assert!(ledger_event.is_confirmed());
        assert!(ledger_event.to_string().contains("CONFIRMED"));
    }

    #[test]
    fn ledger_event_display_failure() {
        let incident_event = IncidentEvent::new("P1", sample_incident());
        let ledger_event = LedgerEvent::for_incident(
            &incident_event,
            5,
            LedgerOutcome::Failed {
                kind: LedgerFailureKind::Unavailable,
                reason: "timeout".to_owned(),
            },
        );
        assert!(!ledger_event.is_confirmed());
        assert!(ledger_event.to_string().contains("FAILED"));
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<IncidentEvent>();
        assert_send_sync::<LedgerEvent>();
    }
}
