//! Audit event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenure_api::EntitlementKind;
use tenure_util::{DurationSpec, EntitlementId, GrantId, MacAddress, RunId};

/// What flipped a grant to inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationSource {
    Sweep,
    Validation,
}

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    GrantCreated {
        grant_id: GrantId,
        identifier: MacAddress,
        owner: String,
        duration: DurationSpec,
    },

    /// Grant re-activated with a new anchor and duration
    GrantRegranted {
        grant_id: GrantId,
        identifier: MacAddress,
        anchor: DateTime<Utc>,
        duration: DurationSpec,
    },

    /// Owner, note, identifier or duration edited in place
    GrantUpdated {
        grant_id: GrantId,
        identifier: MacAddress,
        previous_identifier: Option<MacAddress>,
        duration: DurationSpec,
    },

    /// Grant switched off by an operator
    GrantRevoked {
        grant_id: GrantId,
        identifier: MacAddress,
    },

    /// Grant switched off because its time ran out
    GrantDeactivated {
        grant_id: GrantId,
        identifier: MacAddress,
        expired_at: DateTime<Utc>,
        source: DeactivationSource,
    },

    GrantDeleted {
        grant_id: GrantId,
        identifier: MacAddress,
    },

    EntitlementCreated {
        entitlement_id: EntitlementId,
        kind: EntitlementKind,
        reference: String,
        expires_at: DateTime<Utc>,
    },

    /// Anchor or duration changed
    EntitlementRescheduled {
        entitlement_id: EntitlementId,
        expires_at: DateTime<Utc>,
        alerts_reset: bool,
    },

    /// Cancelled by an operator; no more sweeps or alerts
    EntitlementDeactivated {
        entitlement_id: EntitlementId,
        reference: String,
    },

    EntitlementReactivated {
        entitlement_id: EntitlementId,
        reference: String,
    },

    EntitlementDeleted {
        entitlement_id: EntitlementId,
        kind: EntitlementKind,
        reference: String,
    },

    /// Threshold alert delivered
    AlertSent {
        entitlement_id: EntitlementId,
        threshold_days: u32,
        recipients: usize,
    },

    SweepCompleted {
        run_id: RunId,
        grants_deactivated: usize,
        entitlements_updated: usize,
        failures: usize,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(tenure_util::now(), event)
    }

    pub fn at(timestamp: DateTime<Utc>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
