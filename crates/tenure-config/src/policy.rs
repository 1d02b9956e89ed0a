//! Validated policy structures

use crate::schema::{RawConfig, RawKindPolicy, RawMailConfig, RawServiceConfig};
use crate::validation::{TlsMode, parse_tls_mode};
use std::path::PathBuf;
use std::time::Duration;
use tenure_api::EntitlementKind;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(86_400);
pub const DEFAULT_REPORT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_NEAR_EXPIRY_DAYS: u32 = 30;
pub const DEFAULT_VALIDATION_RETRIES: u32 = 3;
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,

    /// None means mail is not configured; alerts stay pending
    pub mail: Option<MailConfig>,

    pub kinds: KindPolicies,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            mail: raw.mail.map(MailConfig::from_raw),
            kinds: KindPolicies {
                certificate: KindPolicy::from_raw(EntitlementKind::Certificate, raw.kinds.certificate),
                project: KindPolicy::from_raw(EntitlementKind::Project, raw.kinds.project),
            },
        }
    }

    pub fn kind(&self, kind: EntitlementKind) -> &KindPolicy {
        self.kinds.get(kind)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    pub alert_interval: Duration,
    pub report_interval: Duration,
    pub report_window_days: u32,
    pub validation_retries: u32,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(tenure_util::default_data_dir),
            sweep_interval: raw
                .sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            alert_interval: raw
                .alert_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ALERT_INTERVAL),
            report_interval: raw
                .report_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
            report_window_days: raw.report_window_days.unwrap_or(DEFAULT_REPORT_WINDOW_DAYS),
            validation_retries: raw.validation_retries.unwrap_or(DEFAULT_VALIDATION_RETRIES),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    pub tls: TlsMode,
}

impl MailConfig {
    fn from_raw(raw: RawMailConfig) -> Self {
        Self {
            host: raw.host,
            port: raw.port.unwrap_or(DEFAULT_SMTP_PORT),
            from: raw.from,
            username_env: raw.username_env,
            password_env: raw.password_env,
            tls: raw
                .tls
                .as_deref()
                .and_then(|s| parse_tls_mode(s).ok())
                .unwrap_or(TlsMode::StartTls),
        }
    }

    /// Read the SMTP user and password from the configured environment
    /// variables. Returns None when no username variable is configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = std::env::var(self.username_env.as_ref()?).ok()?;
        let password = self
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Some((username, password))
    }
}

/// Alert policy for every entitlement kind
#[derive(Debug, Clone)]
pub struct KindPolicies {
    pub certificate: KindPolicy,
    pub project: KindPolicy,
}

impl KindPolicies {
    pub fn get(&self, kind: EntitlementKind) -> &KindPolicy {
        match kind {
            EntitlementKind::Certificate => &self.certificate,
            EntitlementKind::Project => &self.project,
        }
    }
}

impl Default for KindPolicies {
    fn default() -> Self {
        Self {
            certificate: KindPolicy::default_for(EntitlementKind::Certificate),
            project: KindPolicy::default_for(EntitlementKind::Project),
        }
    }
}

/// Alert policy for one entitlement kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPolicy {
    /// Distinct, sorted ascending
    pub thresholds_days: Vec<u32>,
    pub near_expiry_days: u32,
    pub require_recipient: bool,
    pub fallback_recipients: Vec<String>,
}

impl KindPolicy {
    pub fn default_for(kind: EntitlementKind) -> Self {
        Self::from_raw(kind, None)
    }

    fn from_raw(kind: EntitlementKind, raw: Option<RawKindPolicy>) -> Self {
        let raw = raw.unwrap_or_default();

        let mut thresholds_days = raw
            .thresholds_days
            .unwrap_or_else(|| default_thresholds(kind));
        thresholds_days.sort_unstable();
        thresholds_days.dedup();

        Self {
            thresholds_days,
            near_expiry_days: raw.near_expiry_days.unwrap_or(DEFAULT_NEAR_EXPIRY_DAYS),
            require_recipient: raw
                .require_recipient
                .unwrap_or(kind == EntitlementKind::Project),
            fallback_recipients: raw.fallback_recipients,
        }
    }
}

/// Certificates alert at 30/20/10 days out, projects at 60/30
pub fn default_thresholds(kind: EntitlementKind) -> Vec<u32> {
    match kind {
        EntitlementKind::Certificate => vec![10, 20, 30],
        EntitlementKind::Project => vec![30, 60],
    }
}
