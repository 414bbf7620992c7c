//! `scanguard config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use scanguard_core::config::ScanguardConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const REDACTED: &str = "***REDACTED***";

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Load and validate the configuration file, reporting any errors.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails (missing file, parse errors, invalid values).
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = validation_report(config_path, ScanguardConfig::load(config_path).await);
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }

    Ok(())
}

fn validation_report<T>(
    config_path: &Path,
    result: Result<T, scanguard_core::error::ScanguardError>,
) -> ConfigValidationReport {
    match result {
        Ok(_) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: false,
            errors: vec![e.to_string()],
        },
    }
}

/// Display the effective configuration (file + env overrides + defaults).
///
/// The ledger API key is redacted.
///
/// # Errors
///
/// Returns `CliError::Core` if loading fails or `CliError::Command` if the section name is invalid.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let mut config = ScanguardConfig::load(config_path).await?;
    redact_credentials(&mut config);

    let report = ConfigReport {
        source: config_path.display().to_string(),
        config_toml: section_toml(&config, section.as_deref())?,
        section,
    };

    writer.render(&report)?;

    Ok(())
}

/// Serialize the whole config or one section as TOML.
fn section_toml(config: &ScanguardConfig, section: Option<&str>) -> Result<String, CliError> {
    let rendered = match section {
        None => toml::to_string_pretty(config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("detection") => toml::to_string_pretty(&config.detection),
        Some("ledger") => toml::to_string_pretty(&config.ledger),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: general, detection, ledger)",
                other
            )));
        }
    };
    Ok(rendered.unwrap_or_else(|e| format!("(serialization error: {})", e)))
}

/// Replace the ledger API key, keeping whether one is set visible.
fn redact_credentials(config: &mut ScanguardConfig) {
    if !config.ledger.api_key.is_empty() {
        config.ledger.api_key = REDACTED.to_owned();
    }
}

/// Configuration display report.
///
/// `config_toml` is only used for text rendering.
#[derive(Serialize)]
pub struct ConfigReport {
    /// Configuration file path
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Serialized TOML configuration (with redacted credentials)
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;

        Ok(())
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    /// Configuration file path
    pub source: String,
    /// Whether the configuration is valid
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_toml_ledger_only() {
        let config = ScanguardConfig::default();
        let toml = section_toml(&config, Some("ledger")).expect("known section");
        assert!(toml.contains("backend"));
        assert!(!toml.contains("window_hours"), "should not include other sections");
    }

    #[test]
    fn test_section_toml_full() {
        let config = ScanguardConfig::default();
        let toml = section_toml(&config, None).expect("full config");
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[detection]"));
        assert!(toml.contains("[ledger]"));
    }

    #[test]
    fn test_section_toml_unknown() {
        let config = ScanguardConfig::default();
        let err = section_toml(&config, Some("ebpf")).expect_err("unknown section");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("ebpf"));
    }

    #[test]
    fn test_redact_api_key() {
        let mut config = ScanguardConfig::default();
        config.ledger.api_key = "secret-token".to_owned();
        redact_credentials(&mut config);
        assert_eq!(config.ledger.api_key, REDACTED);

        let toml = section_toml(&config, Some("ledger")).expect("ledger section");
        assert!(!toml.contains("secret-token"));
    }

    #[test]
    fn test_redact_keeps_empty_key_empty() {
        let mut config = ScanguardConfig::default();
        redact_credentials(&mut config);
        assert!(config.ledger.api_key.is_empty());
    }

    #[test]
    fn test_config_report_render_text_specific_section() {
        let report = ConfigReport {
            source: "/etc/scanguard/scanguard.toml".to_owned(),
            section: Some("detection".to_owned()),
            config_toml: "window_hours = 72".to_owned(),
        };

        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("[detection]"), "should show section name");
        assert!(output.contains("window_hours"), "should show config content");
    }

    #[test]
    fn test_config_report_json_skips_toml() {
        let report = ConfigReport {
            source: "test.toml".to_owned(),
            section: Some("ledger".to_owned()),
            config_toml: "backend = \"file\"".to_owned(),
        };

        let json = serde_json::to_string(&report).expect("JSON serialization should succeed");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("should parse JSON");

        assert_eq!(parsed["source"].as_str(), Some("test.toml"));
        assert_eq!(parsed["section"].as_str(), Some("ledger"));
        assert!(
            parsed.get("config_toml").is_none(),
            "config_toml should be skipped"
        );
    }

    #[test]
    fn test_validation_report_invalid() {
        let err = ScanguardConfig::parse("[detection]\nwindow_hours = \"soon\"")
            .expect_err("type mismatch should fail");
        let report = validation_report::<()>(Path::new("bad.toml"), Err(err));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);

        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("INVALID"));
        assert!(output.contains("bad.toml"));
    }

    #[test]
    fn test_validation_report_valid() {
        let report = validation_report(Path::new("scanguard.toml"), Ok(()));
        assert!(report.valid);

        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("VALID"));
        assert!(!output.contains("Error:"));
    }
}
