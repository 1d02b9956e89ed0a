//! Persisted rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tenure_api::{EntitlementKind, EntitlementState};
use tenure_util::{DurationSpec, EntitlementId, GrantId, MacAddress};

/// A MAC-keyed license
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Assigned by the store on insert
    pub id: GrantId,
    pub identifier: MacAddress,
    /// Company the grant was issued to
    pub owner: String,
    pub anchor: DateTime<Utc>,
    pub duration: DurationSpec,
    /// Sole source of truth for admission, apart from time
    pub active: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub version: i64,
}

impl Grant {
    /// A fresh, active grant ready for insertion
    pub fn new(
        identifier: MacAddress,
        owner: impl Into<String>,
        anchor: DateTime<Utc>,
        duration: DurationSpec,
    ) -> Self {
        Self {
            id: GrantId::new(0), // Will be set by store
            identifier,
            owner: owner.into(),
            anchor,
            duration,
            active: true,
            last_validated_at: None,
            note: None,
            version: 0,
        }
    }
}

/// A certificate or project subscription with threshold alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Assigned by the store on insert
    pub id: EntitlementId,
    pub kind: EntitlementKind,
    /// Unique per kind (product id, certificate number)
    pub reference: String,
    pub label: String,
    pub anchor: DateTime<Utc>,
    pub duration: DurationSpec,

    // Derived from (anchor, duration, now); refreshed before every save
    pub expires_at: DateTime<Utc>,
    pub remaining_days: i64,
    pub state: EntitlementState,

    /// Thresholds (days) whose alert was delivered
    pub alerts_sent: BTreeSet<u32>,
    pub primary_recipient: Option<String>,
    pub secondary_recipients: Vec<String>,
    /// Cleared when the entitlement is cancelled; inactive rows are
    /// neither swept nor alerted
    pub active: bool,
    pub version: i64,
}

impl Entitlement {
    /// A fresh entitlement ready for insertion. The derived fields start
    /// at the anchor and must be recomputed before the insert.
    pub fn new(
        kind: EntitlementKind,
        reference: impl Into<String>,
        label: impl Into<String>,
        anchor: DateTime<Utc>,
        duration: DurationSpec,
    ) -> Self {
        Self {
            id: EntitlementId::new(0), // Will be set by store
            kind,
            reference: reference.into(),
            label: label.into(),
            anchor,
            duration,
            expires_at: anchor,
            remaining_days: 0,
            state: EntitlementState::Expired,
            alerts_sent: BTreeSet::new(),
            primary_recipient: None,
            secondary_recipients: Vec::new(),
            active: true,
            version: 0,
        }
    }

    pub fn with_recipients(mut self, primary: Option<String>, secondary: Vec<String>) -> Self {
        self.primary_recipient = primary;
        self.secondary_recipients = secondary;
        self
    }

    /// Primary followed by secondary addresses, trimmed, blanks removed,
    /// first occurrence kept (case-insensitive)
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.primary_recipient
            .iter()
            .chain(self.secondary_recipients.iter())
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .filter(|r| seen.insert(r.to_ascii_lowercase()))
            .map(str::to_string)
            .collect()
    }
}
