//! 이상 탐지기 -- 스캔 윈도우에 대한 순수 판정 함수
//!
//! [`AnomalyDetector`]는 호출자가 이미 윈도우로 잘라낸 스캔 목록만 보고
//! 위조 여부를 판정합니다. I/O와 await 지점이 없습니다.
//!
//! 판정 규칙 (비교 연산은 고정, 임계값만 설정 가능):
//! ```text
//! flagged = scan_count > scan_count_threshold
//!        && distinct_locations >= distinct_location_threshold
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use scanguard_core::metrics as m;
use scanguard_core::types::ScanEvent;

/// 탐지 규칙
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRule {
    /// 윈도우 길이
    pub window: TimeDelta,
    /// 스캔 수가 이 값을 **초과**해야 조건 충족
    pub scan_count_threshold: usize,
    /// 고유 위치 수가 이 값 **이상**이어야 조건 충족
    pub distinct_location_threshold: usize,
}

impl Default for DetectionRule {
    fn default() -> Self {
        Self {
            window: TimeDelta::hours(72),
            scan_count_threshold: 10,
            distinct_location_threshold: 10,
        }
    }
}

/// 탐지 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// 위조 판정 여부
    pub flagged: bool,
    /// 윈도우 내 스캔 수
    pub scan_count: usize,
    /// 윈도우 내 고유 위치 (정렬됨)
    pub distinct_locations: BTreeSet<String>,
}

/// 이상 탐지기
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyDetector {
    rule: DetectionRule,
}

impl AnomalyDetector {
    /// 주어진 규칙으로 탐지기를 생성합니다.
    pub fn new(rule: DetectionRule) -> Self {
        Self { rule }
    }

    /// 탐지 규칙
    pub fn rule(&self) -> &DetectionRule {
        &self.rule
    }

    /// `now` 기준 윈도우 시작 시각
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.rule.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// 윈도우 내 스캔 목록을 평가합니다.
    pub fn evaluate(&self, window: &[ScanEvent]) -> Verdict {
        metrics::counter!(m::DETECTOR_EVALUATIONS_TOTAL).increment(1);

        let distinct_locations: BTreeSet<String> =
            window.iter().map(|scan| scan.location.clone()).collect();
        let scan_count = window.len();

        Verdict {
            flagged: self.is_flagged(scan_count, distinct_locations.len()),
            scan_count,
            distinct_locations,
        }
    }

    /// 집계값만으로 판정합니다.
    pub fn is_flagged(&self, scan_count: usize, distinct_locations: usize) -> bool {
        scan_count > self.rule.scan_count_threshold
            && distinct_locations >= self.rule.distinct_location_threshold
    }
}
