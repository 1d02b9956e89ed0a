//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Outgoing mail. Absent means alerts cannot be delivered.
    #[serde(default)]
    pub mail: Option<RawMailConfig>,

    /// Per-kind alert policy
    #[serde(default)]
    pub kinds: RawKinds,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the database
    pub data_dir: Option<PathBuf>,

    /// Seconds between sweeps (default: 300)
    pub sweep_interval_seconds: Option<u64>,

    /// Seconds between alert passes (default: 3600)
    pub alert_interval_seconds: Option<u64>,

    /// Seconds between expiring-soon reports (default: 86400)
    pub report_interval_seconds: Option<u64>,

    /// Window of the expiring-soon report, in days (default: 7)
    pub report_window_days: Option<u32>,

    /// Attempts a validation makes when its row write loses a race (default: 3)
    pub validation_retries: Option<u32>,
}

/// SMTP relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMailConfig {
    pub host: String,

    /// Default: 587
    pub port: Option<u16>,

    /// Sender mailbox, e.g. "Licencias <licencias@example.com>"
    pub from: String,

    /// Name of the environment variable holding the SMTP user
    pub username_env: Option<String>,

    /// Name of the environment variable holding the SMTP password
    pub password_env: Option<String>,

    /// "starttls" (default), "wrapper" or "none"
    pub tls: Option<String>,
}

/// Per-kind sections
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawKinds {
    pub certificate: Option<RawKindPolicy>,
    pub project: Option<RawKindPolicy>,
}

/// Alert policy for one entitlement kind
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawKindPolicy {
    /// Days before expiry at which an alert is sent, once each
    pub thresholds_days: Option<Vec<u32>>,

    /// Remaining days at or below which the state is NEAR_EXPIRY (default: 30)
    pub near_expiry_days: Option<u32>,

    /// Skip the alert when the entitlement has no address of its own
    pub require_recipient: Option<bool>,

    /// Used when the entitlement has no address and one is not required
    #[serde(default)]
    pub fallback_recipients: Vec<String>,
}
