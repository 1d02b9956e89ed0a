//! Shared types for the tenure engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tenure_util::{DurationSpec, EntitlementId, GrantId, MacAddress, RunId};

/// How an expiry instant is derived from an anchor and a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// anchor + canonical minutes
    Fixed,
    /// anchor + count calendar units (month/year clamping)
    Calendar,
}

/// Entitlement family. Each kind has its own alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementKind {
    Certificate,
    Project,
}

impl EntitlementKind {
    pub const ALL: [EntitlementKind; 2] = [EntitlementKind::Certificate, EntitlementKind::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementKind::Certificate => "certificate",
            EntitlementKind::Project => "project",
        }
    }

    /// Every entitlement kind is evaluated on the calendar
    pub fn evaluation_mode(&self) -> EvaluationMode {
        EvaluationMode::Calendar
    }
}

impl fmt::Display for EntitlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "certificate" => Ok(EntitlementKind::Certificate),
            "project" => Ok(EntitlementKind::Project),
            other => Err(format!("unknown entitlement kind '{}'", other)),
        }
    }
}

/// Grants are evaluated with fixed minute arithmetic
pub const GRANT_EVALUATION_MODE: EvaluationMode = EvaluationMode::Fixed;

/// Derived lifecycle state of an entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    Active,
    NearExpiry,
    Expired,
}

impl EntitlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementState::Active => "active",
            EntitlementState::NearExpiry => "near_expiry",
            EntitlementState::Expired => "expired",
        }
    }
}

impl fmt::Display for EntitlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntitlementState::Active),
            "near_expiry" => Ok(EntitlementState::NearExpiry),
            "expired" => Ok(EntitlementState::Expired),
            other => Err(format!("unknown entitlement state '{}'", other)),
        }
    }
}

/// Derived admission state of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    Admissible,
    Inactive,
    Expired,
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrantState::Admissible => "admissible",
            GrantState::Inactive => "inactive",
            GrantState::Expired => "expired",
        })
    }
}

/// Terminal result of a credential validation. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    InvalidFormat,
    NotFound,
    Inactive,
    Expired,
    Admissible,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationCode::InvalidFormat => "INVALID_FORMAT",
            ValidationCode::NotFound => "NOT_FOUND",
            ValidationCode::Inactive => "INACTIVE",
            ValidationCode::Expired => "EXPIRED",
            ValidationCode::Admissible => "ADMISSIBLE",
        })
    }
}

/// Signed remaining time until an expiry instant.
///
/// Every component carries the sign of `total_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRemaining {
    pub total_minutes: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl TimeRemaining {
    pub fn from_total_minutes(total_minutes: i64) -> Self {
        Self {
            total_minutes,
            days: total_minutes / 1_440,
            hours: (total_minutes % 1_440) / 60,
            minutes: total_minutes % 60,
        }
    }

    pub fn is_elapsed(&self) -> bool {
        self.total_minutes <= 0
    }
}

fn plural(count: i64, singular: &'static str, plural: &'static str) -> String {
    format!("{} {}", count, if count == 1 { singular } else { plural })
}

impl fmt::Display for TimeRemaining {
    /// Two most significant components, e.g. `"3 días, 4 horas"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_elapsed() {
            return f.write_str("vencido");
        }
        if self.days > 0 {
            write!(
                f,
                "{}, {}",
                plural(self.days, "día", "días"),
                plural(self.hours, "hora", "horas")
            )
        } else if self.hours > 0 {
            write!(
                f,
                "{}, {}",
                plural(self.hours, "hora", "horas"),
                plural(self.minutes, "minuto", "minutos")
            )
        } else {
            f.write_str(&plural(self.minutes, "minuto", "minutos"))
        }
    }
}

/// Result of presenting a credential identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub code: ValidationCode,
    pub admissible: bool,
    /// Owner label of the matching grant (admissible only)
    pub entity_label: Option<String>,
    pub remaining: Option<TimeRemaining>,
}

impl ValidationOutcome {
    pub fn rejected(code: ValidationCode) -> Self {
        Self {
            code,
            admissible: false,
            entity_label: None,
            remaining: None,
        }
    }

    pub fn admitted(entity_label: impl Into<String>, remaining: TimeRemaining) -> Self {
        Self {
            code: ValidationCode::Admissible,
            admissible: true,
            entity_label: Some(entity_label.into()),
            remaining: Some(remaining),
        }
    }
}

/// Grant as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantView {
    pub id: GrantId,
    pub identifier: MacAddress,
    pub owner: String,
    pub anchor: DateTime<Utc>,
    pub duration: DurationSpec,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub state: GrantState,
    pub remaining: TimeRemaining,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Entitlement as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementView {
    pub id: EntitlementId,
    pub kind: EntitlementKind,
    pub reference: String,
    pub label: String,
    pub anchor: DateTime<Utc>,
    pub duration: DurationSpec,
    pub expires_at: DateTime<Utc>,
    pub remaining_days: i64,
    pub state: EntitlementState,
    /// Thresholds (days) whose alert has been delivered
    pub alerts_sent: Vec<u32>,
    pub recipients: Vec<String>,
    /// False once cancelled
    pub active: bool,
}

/// Entitlements per lifecycle state. Cancelled rows are counted apart and
/// not classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementCounts {
    pub active: usize,
    pub near_expiry: usize,
    pub expired: usize,
    pub cancelled: usize,
}

impl EntitlementCounts {
    pub fn record(&mut self, state: EntitlementState) {
        match state {
            EntitlementState::Active => self.active += 1,
            EntitlementState::NearExpiry => self.near_expiry += 1,
            EntitlementState::Expired => self.expired += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.active + self.near_expiry + self.expired + self.cancelled
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: RunId,
    pub grants_checked: usize,
    pub grants_deactivated: usize,
    pub entitlements_checked: usize,
    pub entitlements_updated: usize,
    /// Rows whose evaluation or write failed; the rest of the pass continued
    pub failures: usize,
    /// Shutdown was requested before every row was visited
    pub interrupted: bool,
}

impl SweepReport {
    pub fn rows_written(&self) -> usize {
        self.grants_deactivated + self.entitlements_updated
    }
}

/// A delivered threshold alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentAlert {
    pub entitlement_id: EntitlementId,
    pub kind: EntitlementKind,
    pub reference: String,
    pub threshold_days: u32,
    pub recipients: Vec<String>,
}

/// Outcome of one alert pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertReport {
    pub run_id: RunId,
    pub evaluated: usize,
    pub sent: Vec<SentAlert>,
    /// Qualified but nobody to send to; retried next run
    pub skipped_no_recipient: usize,
    /// Transport failures; flag left unset
    pub failed: usize,
    /// Sent, but the flag write lost a version race
    pub conflicts: usize,
}

/// Active grant close to its expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringGrant {
    pub id: GrantId,
    pub identifier: MacAddress,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    pub remaining: TimeRemaining,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_breakdown_truncates_toward_zero() {
        let r = TimeRemaining::from_total_minutes(720);
        assert_eq!((r.days, r.hours, r.minutes), (0, 12, 0));

        let r = TimeRemaining::from_total_minutes(2 * 1_440 + 3 * 60 + 7);
        assert_eq!((r.days, r.hours, r.minutes), (2, 3, 7));

        let r = TimeRemaining::from_total_minutes(-61);
        assert_eq!((r.days, r.hours, r.minutes), (0, -1, -1));

        let r = TimeRemaining::from_total_minutes(-1_441);
        assert_eq!((r.days, r.hours, r.minutes), (-1, 0, -1));
    }

    #[test]
    fn remaining_display() {
        assert_eq!(TimeRemaining::from_total_minutes(1_440 + 60).to_string(), "1 día, 1 hora");
        assert_eq!(TimeRemaining::from_total_minutes(3 * 1_440).to_string(), "3 días, 0 horas");
        assert_eq!(TimeRemaining::from_total_minutes(125).to_string(), "2 horas, 5 minutos");
        assert_eq!(TimeRemaining::from_total_minutes(1).to_string(), "1 minuto");
        assert_eq!(TimeRemaining::from_total_minutes(0).to_string(), "vencido");
    }

    #[test]
    fn validation_code_serialization() {
        let json = serde_json::to_string(&ValidationCode::InvalidFormat).unwrap();
        assert_eq!(json, "\"INVALID_FORMAT\"");
        assert_eq!(ValidationCode::NotFound.to_string(), "NOT_FOUND");
    }

    #[test]
    fn outcome_constructors() {
        let rejected = ValidationOutcome::rejected(ValidationCode::Inactive);
        assert!(!rejected.admissible);
        assert!(rejected.entity_label.is_none());

        let admitted =
            ValidationOutcome::admitted("ACME", TimeRemaining::from_total_minutes(30));
        assert!(admitted.admissible);
        assert_eq!(admitted.code, ValidationCode::Admissible);
        assert_eq!(admitted.entity_label.as_deref(), Some("ACME"));
    }

    #[test]
    fn kind_and_state_parse() {
        assert_eq!("Certificate".parse::<EntitlementKind>(), Ok(EntitlementKind::Certificate));
        assert!("license".parse::<EntitlementKind>().is_err());
        for state in [
            EntitlementState::Active,
            EntitlementState::NearExpiry,
            EntitlementState::Expired,
        ] {
            assert_eq!(state.as_str().parse::<EntitlementState>(), Ok(state));
        }
    }
}
