//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않은 프로세스에서는 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `scanguard_`
//! - 컴포넌트명: `scans_`, `detector_`, `incidents_`, `ledger_`, `reports_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 실패 유형 레이블 키 (unavailable, rejected)
pub const LABEL_FAILURE_KIND: &str = "kind";

/// 스캔 거절 사유 레이블 키 (not_found, forbidden)
pub const LABEL_REASON: &str = "reason";

// ─── 스캔 처리 메트릭 ──────────────────────────────────────────────

/// 기록된 스캔 수 (counter)
pub const SCANS_RECORDED_TOTAL: &str = "scanguard_scans_recorded_total";

/// 거절된 스캔 요청 수 (counter, label: reason)
pub const SCANS_REJECTED_TOTAL: &str = "scanguard_scans_rejected_total";

/// 스캔 요청 처리 시간 (histogram, 초)
pub const SCAN_DURATION_SECONDS: &str = "scanguard_scan_duration_seconds";

/// 이상 탐지기 평가 횟수 (counter)
pub const DETECTOR_EVALUATIONS_TOTAL: &str = "scanguard_detector_evaluations_total";

// ─── 인시던트 메트릭 ───────────────────────────────────────────────

/// 생성된 위조 인시던트 수 (counter)
pub const INCIDENTS_RAISED_TOTAL: &str = "scanguard_incidents_raised_total";

/// 동시 경합에서 흡수된 인시던트 생성 시도 수 (counter)
pub const INCIDENT_CONFLICTS_TOTAL: &str = "scanguard_incident_conflicts_total";

/// 제조사 리포트 추가 실패 수 (counter)
pub const REPORTS_ATTACH_FAILURES_TOTAL: &str = "scanguard_reports_attach_failures_total";

// ─── 원장 메트릭 ───────────────────────────────────────────────────

/// 원장 제출 시도 수 (counter, label: result)
pub const LEDGER_SUBMISSIONS_TOTAL: &str = "scanguard_ledger_submissions_total";

/// 원장 확정 수 (counter)
pub const LEDGER_CONFIRMED_TOTAL: &str = "scanguard_ledger_confirmed_total";

/// 원장 최종 실패 수 (counter, label: kind)
pub const LEDGER_FAILED_TOTAL: &str = "scanguard_ledger_failed_total";

/// 원장 제출 지연 시간 (histogram, 초)
pub const LEDGER_SUBMIT_DURATION_SECONDS: &str = "scanguard_ledger_submit_duration_seconds";

/// 재조정으로 다시 제출된 인시던트 수 (counter)
pub const LEDGER_RECONCILED_TOTAL: &str = "scanguard_ledger_reconciled_total";

/// 모든 메트릭 이름 목록
pub const ALL_METRIC_NAMES: [&str; 12] = [
    SCANS_RECORDED_TOTAL,
    SCANS_REJECTED_TOTAL,
    SCAN_DURATION_SECONDS,
    DETECTOR_EVALUATIONS_TOTAL,
    INCIDENTS_RAISED_TOTAL,
    INCIDENT_CONFLICTS_TOTAL,
    REPORTS_ATTACH_FAILURES_TOTAL,
    LEDGER_SUBMISSIONS_TOTAL,
    LEDGER_CONFIRMED_TOTAL,
    LEDGER_FAILED_TOTAL,
    LEDGER_SUBMIT_DURATION_SECONDS,
    LEDGER_RECONCILED_TOTAL,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더를 설치한 뒤 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(SCANS_RECORDED_TOTAL, "Total number of scans appended to product history");
    describe_counter!(
        SCANS_REJECTED_TOTAL,
        "Total number of scan requests rejected (unknown code, manufacturer self-scan)"
    );
    describe_histogram!(
        SCAN_DURATION_SECONDS,
        "Time to record a scan and return the verification result in seconds"
    );
    describe_counter!(
        DETECTOR_EVALUATIONS_TOTAL,
        "Total number of anomaly detector evaluations"
    );

    describe_counter!(INCIDENTS_RAISED_TOTAL, "Total number of counterfeit incidents raised");
    describe_counter!(
        INCIDENT_CONFLICTS_TOTAL,
        "Total number of concurrent incident raises absorbed by the store conflict check"
    );
    describe_counter!(
        REPORTS_ATTACH_FAILURES_TOTAL,
        "Total number of manufacturer report entries that could not be attached"
    );

    describe_counter!(LEDGER_SUBMISSIONS_TOTAL, "Total number of ledger submit attempts");
    describe_counter!(LEDGER_CONFIRMED_TOTAL, "Total number of incidents confirmed by the ledger");
    describe_counter!(
        LEDGER_FAILED_TOTAL,
        "Total number of incidents whose ledger submission failed permanently"
    );
    describe_histogram!(
        LEDGER_SUBMIT_DURATION_SECONDS,
        "Latency of a single ledger submit call in seconds"
    );
    describe_counter!(
        LEDGER_RECONCILED_TOTAL,
        "Total number of unconfirmed incidents re-enqueued by reconciliation"
    );
}
