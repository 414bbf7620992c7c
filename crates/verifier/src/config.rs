//! 검증기 설정
//!
//! [`VerifierConfig`]는 core의 [`ScanguardConfig`]에서 탐지 규칙과
//! 원장 워커 설정을 추출한 런타임 설정입니다. 생성 이후 변경되지 않습니다.
//!
//! # 사용 예시
//! ```ignore
//! use scanguard_core::config::ScanguardConfig;
//! use scanguard_verifier::config::VerifierConfig;
//!
//! let core_config = ScanguardConfig::default();
//! let config = VerifierConfig::from_core(&core_config);
//! ```

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use scanguard_core::config::ScanguardConfig;

use crate::detector::DetectionRule;
use crate::error::VerifierError;

/// 설정 상한값 상수
const MAX_WINDOW_HOURS: u64 = 24 * 365;
const MAX_ATTEMPTS: u32 = 20;
const MAX_IN_FLIGHT: usize = 1024;

/// 검증기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// 탐지 윈도우 (시간)
    pub window_hours: u64,
    /// 스캔 수 임계값
    pub scan_count_threshold: usize,
    /// 고유 위치 수 임계값
    pub distinct_location_threshold: usize,
    /// 인시던트당 최대 원장 제출 시도 횟수
    pub max_attempts: u32,
    /// 백오프 기본 간격 (밀리초)
    pub backoff_base_ms: u64,
    /// 백오프 상한 (초)
    pub backoff_max_secs: u64,
    /// 원장 호출 1회 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 동시 원장 제출 수
    pub max_in_flight: usize,
    /// 제출 대기 큐 용량
    pub queue_capacity: usize,
    /// 재조정 주기 (초, 0이면 시작 시 한 번만)
    pub reconcile_interval_secs: u64,
    /// 정지 시 진행 중인 제출 대기 시간 (초)
    pub shutdown_grace_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::from_core(&ScanguardConfig::default())
    }
}

impl VerifierConfig {
    /// core 설정에서 검증기 설정을 생성합니다.
    pub fn from_core(core: &ScanguardConfig) -> Self {
        Self {
            window_hours: core.detection.window_hours,
            scan_count_threshold: core.detection.scan_count_threshold,
            distinct_location_threshold: core.detection.distinct_location_threshold,
            max_attempts: core.ledger.max_attempts,
            backoff_base_ms: core.ledger.backoff_base_ms,
            backoff_max_secs: core.ledger.backoff_max_secs,
            request_timeout_secs: core.ledger.request_timeout_secs,
            max_in_flight: core.ledger.max_in_flight,
            queue_capacity: core.ledger.queue_capacity,
            reconcile_interval_secs: core.ledger.reconcile_interval_secs,
            shutdown_grace_secs: core.ledger.shutdown_grace_secs,
        }
    }

    /// 탐지 규칙을 반환합니다.
    pub fn detection_rule(&self) -> DetectionRule {
        DetectionRule {
            window: i64::try_from(self.window_hours)
                .ok()
                .and_then(TimeDelta::try_hours)
                .unwrap_or(TimeDelta::MAX),
            scan_count_threshold: self.scan_count_threshold,
            distinct_location_threshold: self.distinct_location_threshold,
        }
    }

    /// 원장 호출 타임아웃
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 재조정 주기 (0이면 None)
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }

    /// 정지 대기 시간
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VerifierError> {
        if self.window_hours == 0 || self.window_hours > MAX_WINDOW_HOURS {
            return Err(config_err(
                "window_hours",
                format!("must be 1-{MAX_WINDOW_HOURS}"),
            ));
        }

        if self.scan_count_threshold == 0 {
            return Err(config_err("scan_count_threshold", "must be greater than 0"));
        }

        if self.distinct_location_threshold == 0 {
            return Err(config_err(
                "distinct_location_threshold",
                "must be greater than 0",
            ));
        }

        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS {
            return Err(config_err("max_attempts", format!("must be 1-{MAX_ATTEMPTS}")));
        }

        if self.backoff_base_ms == 0 {
            return Err(config_err("backoff_base_ms", "must be greater than 0"));
        }

        if self.request_timeout_secs == 0 {
            return Err(config_err("request_timeout_secs", "must be greater than 0"));
        }

        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT {
            return Err(config_err("max_in_flight", format!("must be 1-{MAX_IN_FLIGHT}")));
        }

        if self.queue_capacity == 0 {
            return Err(config_err("queue_capacity", "must be greater than 0"));
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> VerifierError {
    VerifierError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 검증기 설정 빌더
#[derive(Default)]
pub struct VerifierConfigBuilder {
    config: VerifierConfig,
}

impl VerifierConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 탐지 윈도우(시간)를 설정합니다.
    pub fn window_hours(mut self, hours: u64) -> Self {
        self.config.window_hours = hours;
        self
    }

    /// 스캔 수 임계값을 설정합니다.
    pub fn scan_count_threshold(mut self, threshold: usize) -> Self {
        self.config.scan_count_threshold = threshold;
        self
    }

    /// 고유 위치 수 임계값을 설정합니다.
    pub fn distinct_location_threshold(mut self, threshold: usize) -> Self {
        self.config.distinct_location_threshold = threshold;
        self
    }

    /// 최대 원장 제출 시도 횟수를 설정합니다.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// 백오프 기본 간격(밀리초)을 설정합니다.
    pub fn backoff_base_ms(mut self, ms: u64) -> Self {
        self.config.backoff_base_ms = ms;
        self
    }

    /// 백오프 상한(초)을 설정합니다.
    pub fn backoff_max_secs(mut self, secs: u64) -> Self {
        self.config.backoff_max_secs = secs;
        self
    }

    /// 원장 호출 타임아웃(초)을 설정합니다.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// 동시 제출 수를 설정합니다.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    /// 제출 대기 큐 용량을 설정합니다.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// 재조정 주기(초)를 설정합니다.
    pub fn reconcile_interval_secs(mut self, secs: u64) -> Self {
        self.config.reconcile_interval_secs = secs;
        self
    }

    /// 정지 대기 시간(초)을 설정합니다.
    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    /// 설정을 검증하고 `VerifierConfig`를 생성합니다.
    pub fn build(self) -> Result<VerifierConfig, VerifierError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
