//! Configuration validation

use crate::schema::{RawConfig, RawKindPolicy, RawMailConfig, RawServiceConfig};
use std::collections::HashSet;
use tenure_api::EntitlementKind;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Kind '{kind}': {message}")]
    KindError {
        kind: EntitlementKind,
        message: String,
    },

    #[error("Duplicate threshold {days} days for kind '{kind}'")]
    DuplicateThreshold { kind: EntitlementKind, days: u32 },

    #[error("Service config error: {0}")]
    ServiceError(String),

    #[error("Mail config error: {0}")]
    MailError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_service(&config.service);

    if let Some(mail) = &config.mail {
        errors.extend(validate_mail(mail));
    }

    for (kind, raw) in [
        (EntitlementKind::Certificate, &config.kinds.certificate),
        (EntitlementKind::Project, &config.kinds.project),
    ] {
        if let Some(raw) = raw {
            errors.extend(validate_kind(kind, raw));
        }
    }

    errors
}

fn validate_service(service: &RawServiceConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (name, value) in [
        ("sweep_interval_seconds", service.sweep_interval_seconds),
        ("alert_interval_seconds", service.alert_interval_seconds),
        ("report_interval_seconds", service.report_interval_seconds),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ServiceError(format!(
                "{} must be greater than zero",
                name
            )));
        }
    }

    if service.report_window_days == Some(0) {
        errors.push(ValidationError::ServiceError(
            "report_window_days must be greater than zero".into(),
        ));
    }

    if service.validation_retries == Some(0) {
        errors.push(ValidationError::ServiceError(
            "validation_retries must be at least 1".into(),
        ));
    }

    errors
}

fn validate_mail(mail: &RawMailConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if mail.host.trim().is_empty() {
        errors.push(ValidationError::MailError("host cannot be empty".into()));
    }

    if !mail.from.contains('@') {
        errors.push(ValidationError::MailError(format!(
            "from '{}' is not a mailbox",
            mail.from
        )));
    }

    if mail.port == Some(0) {
        errors.push(ValidationError::MailError("port cannot be zero".into()));
    }

    if let Some(tls) = &mail.tls
        && parse_tls_mode(tls).is_err() {
            errors.push(ValidationError::MailError(format!(
                "unknown tls mode '{}' (expected starttls, wrapper or none)",
                tls
            )));
        }

    if mail.password_env.is_some() && mail.username_env.is_none() {
        errors.push(ValidationError::MailError(
            "password_env is set but username_env is not".into(),
        ));
    }

    errors
}

fn validate_kind(kind: EntitlementKind, raw: &RawKindPolicy) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(thresholds) = &raw.thresholds_days {
        if thresholds.is_empty() {
            errors.push(ValidationError::KindError {
                kind,
                message: "thresholds_days cannot be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for &days in thresholds {
            if days == 0 {
                errors.push(ValidationError::KindError {
                    kind,
                    message: "thresholds_days cannot contain 0".into(),
                });
            } else if !seen.insert(days) {
                errors.push(ValidationError::DuplicateThreshold { kind, days });
            }
        }
    }

    for recipient in &raw.fallback_recipients {
        if !recipient.contains('@') {
            errors.push(ValidationError::KindError {
                kind,
                message: format!("fallback recipient '{}' is not an address", recipient),
            });
        }
    }

    if raw.require_recipient == Some(true) && !raw.fallback_recipients.is_empty() {
        errors.push(ValidationError::KindError {
            kind,
            message: "fallback_recipients are never used when require_recipient = true".into(),
        });
    }

    errors
}

/// TLS mode for the SMTP relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    StartTls,
    Wrapper,
    None,
}

/// Parse a tls mode string
pub fn parse_tls_mode(s: &str) -> Result<TlsMode, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "starttls" => Ok(TlsMode::StartTls),
        "wrapper" | "tls" => Ok(TlsMode::Wrapper),
        "none" => Ok(TlsMode::None),
        other => Err(format!("unknown tls mode '{}'", other)),
    }
}
