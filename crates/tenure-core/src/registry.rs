//! Grant and entitlement management
//!
//! Every mutation recomputes derived fields before it is saved and leaves an
//! audit record. Listing returns views refreshed against the current clock
//! without writing them back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tenure_api::{EntitlementCounts, EntitlementKind, EntitlementView, GrantView};
use tenure_config::KindPolicies;
use tenure_store::{AuditEvent, AuditEventType, Entitlement, Grant, Store};
use tenure_util::{Clock, DurationSpec, EntitlementId, MacAddress, TenureError};
use tracing::{debug, info};

use crate::{entitlement_view, grant_view, recompute_entitlement, record_audit};

/// Input for [`Registry::create_entitlement`]
#[derive(Debug, Clone)]
pub struct NewEntitlement {
    pub kind: EntitlementKind,
    pub reference: String,
    pub label: String,
    pub duration: DurationSpec,
    /// Defaults to now
    pub anchor: Option<DateTime<Utc>>,
    pub primary_recipient: Option<String>,
    pub secondary_recipients: Vec<String>,
}

/// Fields to change on an existing grant; `None` leaves a field as is
#[derive(Debug, Clone, Default)]
pub struct GrantUpdate {
    pub identifier: Option<String>,
    pub owner: Option<String>,
    /// An empty note clears it
    pub note: Option<String>,
    /// Applied from the existing anchor
    pub duration: Option<String>,
}

pub struct Registry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    kinds: KindPolicies,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, kinds: KindPolicies) -> Self {
        Self {
            store,
            clock,
            kinds,
        }
    }

    // Grants

    /// Issue a new grant anchored now
    pub fn create_grant(
        &self,
        identifier: &str,
        owner: &str,
        duration: &str,
        note: Option<String>,
    ) -> Result<GrantView, TenureError> {
        let identifier = MacAddress::parse(identifier)?;
        let duration = DurationSpec::parse(duration)?;
        let now = self.clock.now();

        let mut grant = Grant::new(identifier, owner.trim(), now, duration);
        grant.note = note;
        let view = grant_view(&grant, now)?;

        let stored = self.store.insert_grant(&grant)?;
        info!(
            grant_id = %stored.id,
            identifier = %stored.identifier,
            owner = %stored.owner,
            expires_at = %view.expires_at,
            "Grant created"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::GrantCreated {
                    grant_id: stored.id,
                    identifier: stored.identifier.clone(),
                    owner: stored.owner.clone(),
                    duration: stored.duration,
                },
            ),
        );

        Ok(grant_view(&stored, now)?)
    }

    /// Restart a grant from now, optionally with a new duration, and
    /// reactivate it
    pub fn regrant_grant(
        &self,
        identifier: &str,
        duration: Option<&str>,
    ) -> Result<GrantView, TenureError> {
        let mut grant = self.load_grant(identifier)?;
        if let Some(text) = duration {
            grant.duration = DurationSpec::parse(text)?;
        }

        let now = self.clock.now();
        grant.anchor = now;
        grant.active = true;
        grant.last_validated_at = None;
        grant_view(&grant, now)?;

        let saved = self.store.save_grant(&grant)?;
        info!(
            grant_id = %saved.id,
            identifier = %saved.identifier,
            duration = %saved.duration,
            "Grant regranted"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::GrantRegranted {
                    grant_id: saved.id,
                    identifier: saved.identifier.clone(),
                    anchor: saved.anchor,
                    duration: saved.duration,
                },
            ),
        );

        Ok(grant_view(&saved, now)?)
    }

    /// Clear the active flag by hand. Revoking an inactive grant is a no-op.
    pub fn revoke_grant(&self, identifier: &str) -> Result<GrantView, TenureError> {
        let mut grant = self.load_grant(identifier)?;
        let now = self.clock.now();

        if !grant.active {
            debug!(identifier = %grant.identifier, "Grant already inactive");
            return Ok(grant_view(&grant, now)?);
        }

        grant.active = false;
        let saved = self.store.save_grant(&grant)?;
        info!(grant_id = %saved.id, identifier = %saved.identifier, "Grant revoked");
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::GrantRevoked {
                    grant_id: saved.id,
                    identifier: saved.identifier.clone(),
                },
            ),
        );

        Ok(grant_view(&saved, now)?)
    }

    pub fn delete_grant(&self, identifier: &str) -> Result<(), TenureError> {
        let grant = self.load_grant(identifier)?;
        if !self.store.delete_grant(grant.id)? {
            return Err(TenureError::not_found(format!("grant {}", grant.identifier)));
        }

        info!(grant_id = %grant.id, identifier = %grant.identifier, "Grant deleted");
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                self.clock.now(),
                AuditEventType::GrantDeleted {
                    grant_id: grant.id,
                    identifier: grant.identifier,
                },
            ),
        );
        Ok(())
    }

    pub fn get_grant(&self, identifier: &str) -> Result<GrantView, TenureError> {
        let grant = self.load_grant(identifier)?;
        Ok(grant_view(&grant, self.clock.now())?)
    }

    /// All grants, soonest expiry first
    pub fn list_grants(&self) -> Result<Vec<GrantView>, TenureError> {
        let now = self.clock.now();
        let mut views = self
            .store
            .list_grants()?
            .iter()
            .map(|g| grant_view(g, now))
            .collect::<Result<Vec<_>, _>>()?;
        views.sort_by_key(|v| v.expires_at);
        Ok(views)
    }

    /// Edit a grant in place. The anchor and the active flag are kept;
    /// an inactive grant needs a regrant to come back.
    pub fn update_grant(&self, identifier: &str, update: GrantUpdate) -> Result<GrantView, TenureError> {
        let mut grant = self.load_grant(identifier)?;
        let now = self.clock.now();

        let mut previous_identifier = None;
        if let Some(raw) = update.identifier.as_deref() {
            let renamed = MacAddress::parse(raw)?;
            if renamed != grant.identifier {
                if self.store.find_grant_by_identifier(&renamed)?.is_some() {
                    return Err(TenureError::duplicate(format!("grant {}", renamed)));
                }
                previous_identifier = Some(std::mem::replace(&mut grant.identifier, renamed));
            }
        }
        if let Some(owner) = update.owner {
            grant.owner = owner.trim().to_string();
        }
        if let Some(note) = update.note {
            let note = note.trim();
            grant.note = (!note.is_empty()).then(|| note.to_string());
        }
        if let Some(text) = update.duration.as_deref() {
            grant.duration = DurationSpec::parse(text)?;
        }
        grant_view(&grant, now)?;

        let saved = self.store.save_grant(&grant)?;
        info!(
            grant_id = %saved.id,
            identifier = %saved.identifier,
            owner = %saved.owner,
            duration = %saved.duration,
            "Grant updated"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::GrantUpdated {
                    grant_id: saved.id,
                    identifier: saved.identifier.clone(),
                    previous_identifier,
                    duration: saved.duration,
                },
            ),
        );

        Ok(grant_view(&saved, now)?)
    }

    /// Grants whose owner or identifier contains `query`, ignoring case.
    /// `:` in the query matches the `-` separators. An empty query matches
    /// everything.
    pub fn search_grants(&self, query: &str) -> Result<Vec<GrantView>, TenureError> {
        let query = query.trim();
        let owner_needle = query.to_lowercase();
        let mac_needle = query.replace(':', "-").to_uppercase();

        let now = self.clock.now();
        let mut views = self
            .store
            .list_grants()?
            .iter()
            .filter(|g| {
                g.owner.to_lowercase().contains(&owner_needle)
                    || g.identifier.as_str().contains(&mac_needle)
            })
            .map(|g| grant_view(g, now))
            .collect::<Result<Vec<_>, _>>()?;
        views.sort_by_key(|v| v.expires_at);
        Ok(views)
    }

    fn load_grant(&self, identifier: &str) -> Result<Grant, TenureError> {
        let identifier = MacAddress::parse(identifier)?;
        self.store
            .find_grant_by_identifier(&identifier)?
            .ok_or_else(|| TenureError::not_found(format!("grant {}", identifier)))
    }

    // Entitlements

    pub fn create_entitlement(&self, request: NewEntitlement) -> Result<EntitlementView, TenureError> {
        let now = self.clock.now();
        let reference = request.reference.trim();
        if reference.is_empty() {
            return Err(TenureError::invalid("entitlement reference must not be empty"));
        }

        let mut entitlement = Entitlement::new(
            request.kind,
            reference,
            request.label.trim(),
            request.anchor.unwrap_or(now),
            request.duration,
        )
        .with_recipients(request.primary_recipient, request.secondary_recipients);
        recompute_entitlement(&mut entitlement, now, self.near_expiry_days(request.kind))?;

        let stored = self.store.insert_entitlement(&entitlement)?;
        info!(
            entitlement_id = %stored.id,
            kind = %stored.kind,
            reference = %stored.reference,
            expires_at = %stored.expires_at,
            state = %stored.state,
            "Entitlement created"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::EntitlementCreated {
                    entitlement_id: stored.id,
                    kind: stored.kind,
                    reference: stored.reference.clone(),
                    expires_at: stored.expires_at,
                },
            ),
        );

        Ok(entitlement_view(&stored))
    }

    /// Move the anchor and/or change the duration. Sent alert flags are
    /// cleared when either actually changes.
    pub fn reschedule_entitlement(
        &self,
        id: EntitlementId,
        anchor: Option<DateTime<Utc>>,
        duration: Option<DurationSpec>,
    ) -> Result<EntitlementView, TenureError> {
        let mut entitlement = self.load_entitlement(id)?;
        let now = self.clock.now();

        let new_anchor = anchor.unwrap_or(entitlement.anchor);
        let new_duration = duration.unwrap_or(entitlement.duration);
        let alerts_reset = new_anchor != entitlement.anchor || new_duration != entitlement.duration;

        entitlement.anchor = new_anchor;
        entitlement.duration = new_duration;
        if alerts_reset {
            entitlement.alerts_sent.clear();
        }
        let near_expiry_days = self.near_expiry_days(entitlement.kind);
        recompute_entitlement(&mut entitlement, now, near_expiry_days)?;

        let saved = self.store.save_entitlement(&entitlement)?;
        info!(
            entitlement_id = %saved.id,
            reference = %saved.reference,
            expires_at = %saved.expires_at,
            alerts_reset,
            "Entitlement rescheduled"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::EntitlementRescheduled {
                    entitlement_id: saved.id,
                    expires_at: saved.expires_at,
                    alerts_reset,
                },
            ),
        );

        Ok(entitlement_view(&saved))
    }

    pub fn set_recipients(
        &self,
        id: EntitlementId,
        primary: Option<String>,
        secondary: Vec<String>,
    ) -> Result<EntitlementView, TenureError> {
        let mut entitlement = self.load_entitlement(id)?;
        entitlement.primary_recipient = primary;
        entitlement.secondary_recipients = secondary;
        let near_expiry_days = self.near_expiry_days(entitlement.kind);
        recompute_entitlement(&mut entitlement, self.clock.now(), near_expiry_days)?;

        let saved = self.store.save_entitlement(&entitlement)?;
        debug!(entitlement_id = %saved.id, recipients = saved.recipients().len(), "Recipients updated");
        Ok(entitlement_view(&saved))
    }

    /// Cancel an entitlement. It keeps its data but is skipped by sweeps
    /// and alerts. Cancelling twice is a no-op.
    pub fn deactivate_entitlement(&self, id: EntitlementId) -> Result<EntitlementView, TenureError> {
        let mut entitlement = self.load_entitlement(id)?;
        if !entitlement.active {
            debug!(entitlement_id = %id, "Entitlement already cancelled");
            return Ok(entitlement_view(&entitlement));
        }

        entitlement.active = false;
        let saved = self.store.save_entitlement(&entitlement)?;
        info!(entitlement_id = %saved.id, reference = %saved.reference, "Entitlement cancelled");
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                self.clock.now(),
                AuditEventType::EntitlementDeactivated {
                    entitlement_id: saved.id,
                    reference: saved.reference.clone(),
                },
            ),
        );

        Ok(entitlement_view(&saved))
    }

    /// Undo a cancellation. Derived fields are refreshed; delivered alert
    /// flags are kept.
    pub fn reactivate_entitlement(&self, id: EntitlementId) -> Result<EntitlementView, TenureError> {
        let mut entitlement = self.load_entitlement(id)?;
        let now = self.clock.now();
        let near_expiry_days = self.near_expiry_days(entitlement.kind);

        if entitlement.active {
            debug!(entitlement_id = %id, "Entitlement already active");
            recompute_entitlement(&mut entitlement, now, near_expiry_days)?;
            return Ok(entitlement_view(&entitlement));
        }

        entitlement.active = true;
        recompute_entitlement(&mut entitlement, now, near_expiry_days)?;
        let saved = self.store.save_entitlement(&entitlement)?;
        info!(
            entitlement_id = %saved.id,
            reference = %saved.reference,
            state = %saved.state,
            "Entitlement reactivated"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::EntitlementReactivated {
                    entitlement_id: saved.id,
                    reference: saved.reference.clone(),
                },
            ),
        );

        Ok(entitlement_view(&saved))
    }

    pub fn delete_entitlement(&self, id: EntitlementId) -> Result<(), TenureError> {
        let entitlement = self.load_entitlement(id)?;
        if !self.store.delete_entitlement(id)? {
            return Err(TenureError::not_found(format!("entitlement {}", id)));
        }

        info!(entitlement_id = %id, reference = %entitlement.reference, "Entitlement deleted");
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                self.clock.now(),
                AuditEventType::EntitlementDeleted {
                    entitlement_id: id,
                    kind: entitlement.kind,
                    reference: entitlement.reference,
                },
            ),
        );
        Ok(())
    }

    pub fn get_entitlement(&self, id: EntitlementId) -> Result<EntitlementView, TenureError> {
        let mut entitlement = self.load_entitlement(id)?;
        let near_expiry_days = self.near_expiry_days(entitlement.kind);
        recompute_entitlement(&mut entitlement, self.clock.now(), near_expiry_days)?;
        Ok(entitlement_view(&entitlement))
    }

    /// Entitlements refreshed against the clock, optionally of one kind,
    /// soonest expiry first. Nothing is written back.
    pub fn list_entitlements(
        &self,
        kind: Option<EntitlementKind>,
    ) -> Result<Vec<EntitlementView>, TenureError> {
        let now = self.clock.now();
        let mut views = Vec::new();

        for mut entitlement in self.store.list_entitlements()? {
            if kind.is_some_and(|k| k != entitlement.kind) {
                continue;
            }
            let near_expiry_days = self.near_expiry_days(entitlement.kind);
            recompute_entitlement(&mut entitlement, now, near_expiry_days)?;
            views.push(entitlement_view(&entitlement));
        }

        views.sort_by_key(|v| v.expires_at);
        Ok(views)
    }

    /// Entitlements per state, optionally of one kind
    pub fn count_entitlements(
        &self,
        kind: Option<EntitlementKind>,
    ) -> Result<EntitlementCounts, TenureError> {
        let now = self.clock.now();
        let mut counts = EntitlementCounts::default();

        for mut entitlement in self.store.list_entitlements()? {
            if kind.is_some_and(|k| k != entitlement.kind) {
                continue;
            }
            if !entitlement.active {
                counts.cancelled += 1;
                continue;
            }
            let near_expiry_days = self.near_expiry_days(entitlement.kind);
            recompute_entitlement(&mut entitlement, now, near_expiry_days)?;
            counts.record(entitlement.state);
        }

        Ok(counts)
    }

    pub fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEvent>, TenureError> {
        Ok(self.store.get_recent_audits(limit)?)
    }

    fn load_entitlement(&self, id: EntitlementId) -> Result<Entitlement, TenureError> {
        self.store
            .get_entitlement(id)?
            .ok_or_else(|| TenureError::not_found(format!("entitlement {}", id)))
    }

    fn near_expiry_days(&self, kind: EntitlementKind) -> u32 {
        self.kinds.get(kind).near_expiry_days
    }
}
