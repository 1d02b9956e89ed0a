//! Periodic sweep
//!
//! Recomputes the derived state of every active grant and every
//! entitlement that has not been cancelled, clears the flag on grants whose time has run out, and
//! writes only rows that actually changed. Failures are per row; the pass
//! continues. A raised shutdown flag stops the pass between rows.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tenure_api::{ExpiringGrant, GrantState, SweepReport};
use tenure_config::KindPolicies;
use tenure_store::{AuditEvent, AuditEventType, DeactivationSource, Entitlement, Grant, Store};
use tenure_util::{Clock, RunId, TenureError};
use tracing::{debug, info, warn};

use crate::{evaluate_grant, recompute_entitlement, record_audit};

pub struct Sweeper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    kinds: KindPolicies,
    shutdown: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, kinds: KindPolicies) -> Self {
        Self {
            store,
            clock,
            kinds,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a shutdown flag with the caller
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One sweep pass over grants, then entitlements
    pub fn run_sweep(&self) -> Result<SweepReport, TenureError> {
        let run_id = RunId::new();
        let now = self.clock.now();
        let mut report = SweepReport {
            run_id: run_id.clone(),
            ..Default::default()
        };

        for grant in self.store.list_active_grants()? {
            if self.stopping() {
                report.interrupted = true;
                break;
            }
            report.grants_checked += 1;

            let grant_id = grant.id;
            match self.sweep_grant(grant, now) {
                Ok(true) => report.grants_deactivated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(run_id = %run_id, grant_id = %grant_id, error = %e, "Sweep failed for grant");
                    report.failures += 1;
                }
            }
        }

        if !report.interrupted {
            match self.store.list_active_entitlements() {
                Ok(entitlements) => self.sweep_entitlements(entitlements, now, &mut report),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Cannot list entitlements; sweep is partial");
                    report.failures += 1;
                }
            }
        }

        if report.rows_written() > 0 || report.failures > 0 {
            info!(
                run_id = %run_id,
                grants_deactivated = report.grants_deactivated,
                entitlements_updated = report.entitlements_updated,
                failures = report.failures,
                interrupted = report.interrupted,
                "Sweep completed"
            );
            record_audit(
                self.store.as_ref(),
                AuditEvent::at(
                    now,
                    AuditEventType::SweepCompleted {
                        run_id: run_id.clone(),
                        grants_deactivated: report.grants_deactivated,
                        entitlements_updated: report.entitlements_updated,
                        failures: report.failures,
                    },
                ),
            );
        } else {
            debug!(
                run_id = %run_id,
                grants_checked = report.grants_checked,
                entitlements_checked = report.entitlements_checked,
                interrupted = report.interrupted,
                "Sweep found nothing to change"
            );
        }

        Ok(report)
    }

    fn sweep_entitlements(
        &self,
        entitlements: Vec<Entitlement>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for entitlement in entitlements {
            if self.stopping() {
                report.interrupted = true;
                break;
            }
            report.entitlements_checked += 1;

            let entitlement_id = entitlement.id;
            match self.sweep_entitlement(entitlement, now) {
                Ok(true) => report.entitlements_updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        run_id = %report.run_id,
                        entitlement_id = %entitlement_id,
                        error = %e,
                        "Sweep failed for entitlement"
                    );
                    report.failures += 1;
                }
            }
        }
    }

    fn sweep_grant(&self, mut grant: Grant, now: DateTime<Utc>) -> Result<bool, TenureError> {
        let evaluation = evaluate_grant(&grant, now)?;
        if evaluation.state != GrantState::Expired {
            return Ok(false);
        }

        grant.active = false;
        self.store.save_grant(&grant)?;

        info!(
            grant_id = %grant.id,
            identifier = %grant.identifier,
            owner = %grant.owner,
            expired_at = %evaluation.expires_at,
            "Grant deactivated"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::at(
                now,
                AuditEventType::GrantDeactivated {
                    grant_id: grant.id,
                    identifier: grant.identifier,
                    expired_at: evaluation.expires_at,
                    source: DeactivationSource::Sweep,
                },
            ),
        );

        Ok(true)
    }

    fn sweep_entitlement(
        &self,
        mut entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> Result<bool, TenureError> {
        let near_expiry_days = self.kinds.get(entitlement.kind).near_expiry_days;
        let previous = entitlement.state;

        if !recompute_entitlement(&mut entitlement, now, near_expiry_days)? {
            return Ok(false);
        }
        self.store.save_entitlement(&entitlement)?;

        if previous != entitlement.state {
            info!(
                entitlement_id = %entitlement.id,
                kind = %entitlement.kind,
                reference = %entitlement.reference,
                from = %previous,
                to = %entitlement.state,
                "Entitlement state changed"
            );
        }

        Ok(true)
    }

    /// Active grants whose remaining time is within `window_days`, soonest
    /// first. Each one is logged as a warning.
    pub fn report_expiring(&self, window_days: u32) -> Result<Vec<ExpiringGrant>, TenureError> {
        let now = self.clock.now();
        let window_minutes = window_days as i64 * tenure_util::MINUTES_PER_DAY;
        let mut expiring = Vec::new();

        for grant in self.store.list_active_grants()? {
            let evaluation = match evaluate_grant(&grant, now) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(grant_id = %grant.id, error = %e, "Cannot evaluate grant");
                    continue;
                }
            };

            let left = evaluation.remaining.total_minutes;
            if left > 0 && left <= window_minutes {
                expiring.push(ExpiringGrant {
                    id: grant.id,
                    identifier: grant.identifier,
                    owner: grant.owner,
                    expires_at: evaluation.expires_at,
                    remaining: evaluation.remaining,
                });
            }
        }

        expiring.sort_by_key(|g| g.expires_at);

        for grant in &expiring {
            warn!(
                identifier = %grant.identifier,
                owner = %grant.owner,
                expires_at = %tenure_util::format_datetime_full(&grant.expires_at),
                remaining = %grant.remaining,
                "Grant expiring soon"
            );
        }
        if expiring.is_empty() {
            debug!(window_days, "No grants expiring soon");
        } else {
            info!(window_days, count = expiring.len(), "Expiring-soon report");
        }

        Ok(expiring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FaultyStore, at, entitlement, grant, store_with};
    use tenure_api::{EntitlementKind, EntitlementState};

    fn sweeper(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Sweeper {
        Sweeper::new(store, clock, KindPolicies::default())
    }

    #[test]
    fn expired_grant_is_deactivated() {
        let (store, clock) = store_with(at(2025, 1, 1, 11));
        let stored = store
            .insert_grant(&grant("AA-BB-CC-DD-EE-FF", at(2025, 1, 1, 0), "10 horas"))
            .unwrap();
        let live = store
            .insert_grant(&grant("00-00-00-00-00-01", at(2025, 1, 1, 0), "1 día"))
            .unwrap();

        let report = sweeper(store.clone(), clock).run_sweep().unwrap();
        assert_eq!(report.grants_checked, 2);
        assert_eq!(report.grants_deactivated, 1);

        assert!(!store.get_grant(stored.id).unwrap().unwrap().active);
        assert!(store.get_grant(live.id).unwrap().unwrap().active);
    }

    #[test]
    fn second_sweep_writes_nothing() {
        let (store, clock) = store_with(at(2025, 1, 1, 11));
        store
            .insert_grant(&grant("AA-BB-CC-DD-EE-FF", at(2025, 1, 1, 0), "10 horas"))
            .unwrap();
        let e = store
            .insert_entitlement(&entitlement(EntitlementKind::Project, "P-1", at(2025, 1, 1, 0), "2 meses"))
            .unwrap();

        let sweeper = sweeper(store.clone(), clock);
        let first = sweeper.run_sweep().unwrap();
        assert_eq!(first.rows_written(), 2);
        let version = store.get_entitlement(e.id).unwrap().unwrap().version;

        let second = sweeper.run_sweep().unwrap();
        assert_eq!(second.rows_written(), 0);
        assert_eq!(second.grants_checked, 0);
        assert_eq!(second.entitlements_checked, 1);
        assert_eq!(store.get_entitlement(e.id).unwrap().unwrap().version, version);
    }

    #[test]
    fn sweep_keeps_alert_flags() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let mut e = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes");
        e.alerts_sent.insert(30);
        let stored = store.insert_entitlement(&e).unwrap();

        let sweeper = sweeper(store.clone(), clock.clone());
        sweeper.run_sweep().unwrap();
        clock.advance(chrono::Duration::days(3));
        sweeper.run_sweep().unwrap();

        let reloaded = store.get_entitlement(stored.id).unwrap().unwrap();
        assert!(reloaded.alerts_sent.contains(&30));
        assert_eq!(reloaded.remaining_days, 22);
        assert_eq!(reloaded.state, EntitlementState::NearExpiry);
    }

    #[test]
    fn shutdown_stops_before_next_row() {
        let (store, clock) = store_with(at(2025, 1, 1, 11));
        store
            .insert_grant(&grant("AA-BB-CC-DD-EE-FF", at(2025, 1, 1, 0), "10 horas"))
            .unwrap();

        let shutdown = Arc::new(AtomicBool::new(true));
        let sweeper = sweeper(store.clone(), clock).with_shutdown(shutdown.clone());
        let report = sweeper.run_sweep().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.grants_checked, 0);
        assert_eq!(store.list_active_grants().unwrap().len(), 1);

        shutdown.store(false, Ordering::SeqCst);
        let report = sweeper.run_sweep().unwrap();
        assert!(!report.interrupted);
        assert_eq!(report.grants_deactivated, 1);
    }

    #[test]
    fn expiring_report_window() {
        let (store, clock) = store_with(at(2025, 1, 1, 0));
        store
            .insert_grant(&grant("00-00-00-00-00-01", at(2025, 1, 1, 0), "3 días"))
            .unwrap();
        store
            .insert_grant(&grant("00-00-00-00-00-02", at(2025, 1, 1, 0), "1 semana"))
            .unwrap();
        store
            .insert_grant(&grant("00-00-00-00-00-03", at(2025, 1, 1, 0), "2 semanas"))
            .unwrap();
        let mut revoked = grant("00-00-00-00-00-04", at(2025, 1, 1, 0), "1 día");
        revoked.active = false;
        store.insert_grant(&revoked).unwrap();

        let expiring = sweeper(store, clock).report_expiring(7).unwrap();
        let ids: Vec<&str> = expiring.iter().map(|g| g.identifier.as_str()).collect();
        assert_eq!(ids, vec!["00-00-00-00-00-01", "00-00-00-00-00-02"]);
        assert_eq!(expiring[0].remaining.days, 3);
    }

    #[test]
    fn cancelled_entitlements_are_not_swept() {
        let (store, clock) = store_with(at(2025, 3, 1, 0));
        let mut cancelled = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes");
        cancelled.active = false;
        let cancelled = store.insert_entitlement(&cancelled).unwrap();
        store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "C-2", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();

        let report = sweeper(store.clone(), clock).run_sweep().unwrap();
        assert_eq!(report.entitlements_checked, 1);
        assert_eq!(report.entitlements_updated, 1);

        let untouched = store.get_entitlement(cancelled.id).unwrap().unwrap();
        assert_eq!(untouched.version, cancelled.version);
    }

    #[test]
    fn entitlement_listing_failure_keeps_grant_work() {
        let store = Arc::new(FaultyStore::new());
        let clock = Arc::new(tenure_util::ManualClock::new(at(2025, 1, 1, 11)));
        let stored = store
            .insert_grant(&grant("AA-BB-CC-DD-EE-FF", at(2025, 1, 1, 0), "10 horas"))
            .unwrap();
        store.fail_entitlement_listing(true);

        let report = sweeper(store.clone(), clock).run_sweep().unwrap();
        assert_eq!(report.grants_deactivated, 1);
        assert_eq!(report.entitlements_checked, 0);
        assert_eq!(report.failures, 1);
        assert!(!store.get_grant(stored.id).unwrap().unwrap().active);

        let audits = store.get_recent_audits(10).unwrap();
        assert!(audits.iter().any(|a| matches!(
            a.event,
            AuditEventType::SweepCompleted { grants_deactivated: 1, failures: 1, .. }
        )));
    }
}
