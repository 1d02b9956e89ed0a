//! Configuration parsing and validation for tenure
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Sweep, alert and report cadence
//! - Optional SMTP relay settings
//! - Per-kind alert thresholds and recipient rules
//! - Validation that reports every problem at once

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Policy::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tenure_api::EntitlementKind;

    #[test]
    fn parse_minimal_config() {
        let policy = parse_config("config_version = 1").unwrap();
        assert_eq!(
            policy.kind(EntitlementKind::Certificate).thresholds_days,
            vec![10, 20, 30]
        );
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_thresholds() {
        let config = r#"
            config_version = 1

            [kinds.project]
            thresholds_days = [30, 30]
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "config_version = 1\n[service]\nsweep_interval_seconds = 30\n[mail]\nhost = \"localhost\"\nfrom = \"a@b.c\"\nport = 2525\ntls = \"none\""
        )
        .unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(policy.service.sweep_interval.as_secs(), 30);
        let mail = policy.mail.unwrap();
        assert_eq!(mail.port, 2525);
        assert_eq!(mail.tls, TlsMode::None);
    }

    #[test]
    fn example_config_is_valid() {
        let policy = parse_config(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(policy.service.report_window_days, 7);
        assert!(policy.kind(EntitlementKind::Project).require_recipient);
        assert_eq!(
            policy.kind(EntitlementKind::Certificate).fallback_recipients,
            vec!["legal@example.com".to_string()]
        );
        assert_eq!(policy.mail.unwrap().tls, TlsMode::StartTls);
    }
}
