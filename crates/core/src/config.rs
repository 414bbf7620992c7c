//! 설정 관리: scanguard.toml 파싱 및 런타임 설정
//!
//! [`ScanguardConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//! 로드 이후에는 변경되지 않으며, 원장 자격 증명과 엔드포인트도 이 값으로
//! 원장 클라이언트 생성 시점에 한 번 주입됩니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SCANGUARD_LEDGER_ENDPOINT=https://...` 형식)
//! 3. 설정 파일 (`scanguard.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), scanguard_core::error::ScanguardError> {
//! use scanguard_core::config::ScanguardConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ScanguardConfig::load("scanguard.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ScanguardConfig::parse("[detection]\nwindow_hours = 48")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ScanguardError};

/// 원장 백엔드: 로컬 해시 체인 파일
pub const LEDGER_BACKEND_FILE: &str = "file";
/// 원장 백엔드: 원격 HTTP 원장
pub const LEDGER_BACKEND_HTTP: &str = "http";

/// 상태 스냅샷 파일명 (`general.data_dir` 하위)
pub const STATE_FILE_NAME: &str = "state.json";

const MAX_LEDGER_ATTEMPTS: u32 = 20;
const MAX_WINDOW_HOURS: u64 = 24 * 365;

/// Scanguard 통합 설정
///
/// `scanguard.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanguardConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 이상 탐지 설정
    #[serde(default)]
    pub detection: DetectionConfig,
    /// 원장 연동 설정
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl ScanguardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ScanguardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScanguardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanguardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ScanguardError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ScanguardError> {
        toml::from_str(toml_str).map_err(|e| {
            ScanguardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 상태 스냅샷 파일 경로를 반환합니다.
    pub fn state_path(&self) -> PathBuf {
        Path::new(&self.general.data_dir).join(STATE_FILE_NAME)
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SCANGUARD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SCANGUARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SCANGUARD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "SCANGUARD_GENERAL_DATA_DIR");

        // Detection
        override_u64(
            &mut self.detection.window_hours,
            "SCANGUARD_DETECTION_WINDOW_HOURS",
        );
        override_usize(
            &mut self.detection.scan_count_threshold,
            "SCANGUARD_DETECTION_SCAN_COUNT_THRESHOLD",
        );
        override_usize(
            &mut self.detection.distinct_location_threshold,
            "SCANGUARD_DETECTION_DISTINCT_LOCATION_THRESHOLD",
        );

        // Ledger
        override_string(&mut self.ledger.backend, "SCANGUARD_LEDGER_BACKEND");
        override_string(&mut self.ledger.file_path, "SCANGUARD_LEDGER_FILE_PATH");
        override_string(&mut self.ledger.endpoint, "SCANGUARD_LEDGER_ENDPOINT");
        override_string(&mut self.ledger.api_key, "SCANGUARD_LEDGER_API_KEY");
        override_u64(
            &mut self.ledger.request_timeout_secs,
            "SCANGUARD_LEDGER_REQUEST_TIMEOUT_SECS",
        );
        override_u32(
            &mut self.ledger.max_attempts,
            "SCANGUARD_LEDGER_MAX_ATTEMPTS",
        );
        override_u64(
            &mut self.ledger.backoff_base_ms,
            "SCANGUARD_LEDGER_BACKOFF_BASE_MS",
        );
        override_u64(
            &mut self.ledger.backoff_max_secs,
            "SCANGUARD_LEDGER_BACKOFF_MAX_SECS",
        );
        override_usize(
            &mut self.ledger.max_in_flight,
            "SCANGUARD_LEDGER_MAX_IN_FLIGHT",
        );
        override_usize(
            &mut self.ledger.queue_capacity,
            "SCANGUARD_LEDGER_QUEUE_CAPACITY",
        );
        override_u64(
            &mut self.ledger.reconcile_interval_secs,
            "SCANGUARD_LEDGER_RECONCILE_INTERVAL_SECS",
        );
        override_u64(
            &mut self.ledger.shutdown_grace_secs,
            "SCANGUARD_LEDGER_SHUTDOWN_GRACE_SECS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScanguardError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.data_dir.is_empty() {
            return Err(invalid("general.data_dir", "must not be empty"));
        }

        if self.detection.window_hours == 0 || self.detection.window_hours > MAX_WINDOW_HOURS {
            return Err(invalid(
                "detection.window_hours",
                format!("must be 1-{MAX_WINDOW_HOURS}"),
            ));
        }

        if self.detection.scan_count_threshold == 0 {
            return Err(invalid(
                "detection.scan_count_threshold",
                "must be greater than 0",
            ));
        }

        if self.detection.distinct_location_threshold == 0 {
            return Err(invalid(
                "detection.distinct_location_threshold",
                "must be greater than 0",
            ));
        }

        match self.ledger.backend.as_str() {
            LEDGER_BACKEND_FILE => {
                if self.ledger.file_path.is_empty() {
                    return Err(invalid(
                        "ledger.file_path",
                        "must not be empty when backend is 'file'",
                    ));
                }
            }
            LEDGER_BACKEND_HTTP => {
                let endpoint = self.ledger.endpoint.as_str();
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(invalid(
                        "ledger.endpoint",
                        "must be an http:// or https:// URL when backend is 'http'",
                    ));
                }
                if self.ledger.request_timeout_secs == 0 {
                    return Err(invalid(
                        "ledger.request_timeout_secs",
                        "must be greater than 0",
                    ));
                }
            }
            other => {
                return Err(invalid(
                    "ledger.backend",
                    format!(
                        "unknown backend '{other}', expected '{LEDGER_BACKEND_FILE}' or '{LEDGER_BACKEND_HTTP}'"
                    ),
                ));
            }
        }

        if self.ledger.max_attempts == 0 || self.ledger.max_attempts > MAX_LEDGER_ATTEMPTS {
            return Err(invalid(
                "ledger.max_attempts",
                format!("must be 1-{MAX_LEDGER_ATTEMPTS}"),
            ));
        }

        if self.ledger.backoff_base_ms == 0 {
            return Err(invalid("ledger.backoff_base_ms", "must be greater than 0"));
        }

        if self.ledger.backoff_max_secs.saturating_mul(1000) < self.ledger.backoff_base_ms {
            return Err(invalid(
                "ledger.backoff_max_secs",
                "must not be smaller than backoff_base_ms",
            ));
        }

        if self.ledger.max_in_flight == 0 {
            return Err(invalid("ledger.max_in_flight", "must be greater than 0"));
        }

        if self.ledger.queue_capacity == 0 {
            return Err(invalid("ledger.queue_capacity", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ScanguardError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 상태 스냅샷 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/scanguard".to_owned(),
        }
    }
}

/// 이상 탐지 설정
///
/// 비교 연산은 고정입니다: `스캔 수 > scan_count_threshold` 그리고
/// `고유 위치 수 >= distinct_location_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 탐지 윈도우 (시간)
    pub window_hours: u64,
    /// 스캔 수 임계값 (초과 시 조건 충족)
    pub scan_count_threshold: usize,
    /// 고유 위치 수 임계값 (이상 시 조건 충족)
    pub distinct_location_threshold: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_hours: 72,
            scan_count_threshold: 10,
            distinct_location_threshold: 10,
        }
    }
}

/// 원장 연동 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// 백엔드 종류 (file, http)
    pub backend: String,
    /// 로컬 원장 파일 경로 (backend = "file")
    pub file_path: String,
    /// 원격 원장 엔드포인트 (backend = "http")
    pub endpoint: String,
    /// 원격 원장 API 키 (Bearer 토큰)
    pub api_key: String,
    /// HTTP 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 인시던트당 최대 제출 시도 횟수
    pub max_attempts: u32,
    /// 재시도 백오프 기본 간격 (밀리초), 시도마다 2배
    pub backoff_base_ms: u64,
    /// 재시도 백오프 상한 (초)
    pub backoff_max_secs: u64,
    /// 동시에 진행 가능한 제출 수
    pub max_in_flight: usize,
    /// 제출 대기 큐 용량
    pub queue_capacity: usize,
    /// 미확정 인시던트 재조정 주기 (초, 0이면 시작 시 한 번만)
    pub reconcile_interval_secs: u64,
    /// 정지 시 진행 중인 제출을 기다리는 최대 시간 (초)
    pub shutdown_grace_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LEDGER_BACKEND_FILE.to_owned(),
            file_path: "/var/lib/scanguard/ledger.jsonl".to_owned(),
            endpoint: String::new(),
            api_key: String::new(),
            request_timeout_secs: 30,
            max_attempts: 5,
            backoff_base_ms: 2_000,
            backoff_max_secs: 3_600,
            max_in_flight: 16,
            queue_capacity: 256,
            reconcile_interval_secs: 900,
            shutdown_grace_secs: 10,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = ScanguardConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.detection.window_hours, 72);
        assert_eq!(config.detection.scan_count_threshold, 10);
        assert_eq!(config.detection.distinct_location_threshold, 10);
        assert_eq!(config.ledger.backend, "file");
        assert_eq!(config.ledger.max_attempts, 5);
    }

    #[test]
    fn default_config_passes_validation() {
        ScanguardConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = ScanguardConfig::parse("").unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/scanguard");
        assert_eq!(config.ledger.queue_capacity, 256);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[detection]
window_hours = 48

[ledger]
backend = "http"
endpoint = "https://ledger.example.com"
"#;
        let config = ScanguardConfig::parse(toml).unwrap();
        assert_eq!(config.detection.window_hours, 48);
        // 나머지 탐지 값은 기본값 유지
        assert_eq!(config.detection.scan_count_threshold, 10);
        assert_eq!(config.ledger.backend, "http");
        assert_eq!(config.ledger.max_attempts, 5);
        config.validate().unwrap();
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = ScanguardConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            ScanguardError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn state_path_is_under_data_dir() {
        let mut config = ScanguardConfig::default();
        config.general.data_dir = "/tmp/sg".to_owned();
        assert_eq!(config.state_path(), PathBuf::from("/tmp/sg/state.json"));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = ScanguardConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_window() {
        let mut config = ScanguardConfig::default();
        config.detection.window_hours = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("window_hours"));
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut config = ScanguardConfig::default();
        config.ledger.backend = "kafka".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn validate_rejects_http_backend_without_url() {
        let mut config = ScanguardConfig::default();
        config.ledger.backend = "http".to_owned();
        config.ledger.endpoint = "ledger.internal".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ledger.endpoint"));
    }

    #[test]
    fn validate_ignores_endpoint_for_file_backend() {
        let mut config = ScanguardConfig::default();
        config.ledger.endpoint = "not a url".to_owned();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_attempts_out_of_range() {
        let mut config = ScanguardConfig::default();
        config.ledger.max_attempts = 0;
        assert!(config.validate().is_err());
        config.ledger.max_attempts = 21;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_backoff_cap_below_base() {
        let mut config = ScanguardConfig::default();
        config.ledger.backoff_base_ms = 5_000;
        config.ledger.backoff_max_secs = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_max_secs"));
    }

    #[test]
    #[serial]
    fn env_overrides_replace_file_values() {
        // SAFETY: serial_test로 환경변수를 만지는 테스트를 직렬화함
        unsafe {
            std::env::set_var("SCANGUARD_LEDGER_MAX_ATTEMPTS", "7");
            std::env::set_var("SCANGUARD_DETECTION_WINDOW_HOURS", "24");
        }
        let mut config = ScanguardConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("SCANGUARD_LEDGER_MAX_ATTEMPTS");
            std::env::remove_var("SCANGUARD_DETECTION_WINDOW_HOURS");
        }
        assert_eq!(config.ledger.max_attempts, 7);
        assert_eq!(config.detection.window_hours, 24);
    }

    #[test]
    #[serial]
    fn env_override_with_garbage_is_ignored() {
        unsafe {
            std::env::set_var("SCANGUARD_LEDGER_MAX_IN_FLIGHT", "many");
        }
        let mut config = ScanguardConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("SCANGUARD_LEDGER_MAX_IN_FLIGHT");
        }
        assert_eq!(config.ledger.max_in_flight, 16);
    }

    #[tokio::test]
    async fn from_file_missing_returns_file_not_found() {
        let err = ScanguardConfig::from_file("/nonexistent/scanguard.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanguardError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
