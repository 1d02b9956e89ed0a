//! Threshold alerts
//!
//! Each kind has distinct day thresholds. Sorted ascending, threshold `T_i`
//! owns the band `(T_{i-1}, T_i]` with `T_0 = 0`, so an entitlement sits in
//! at most one band at a time. A flag is written only after the channel
//! confirmed the send; anything short of that leaves it for the next run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tenure_api::{AlertReport, EntitlementState, SentAlert};
use tenure_config::{KindPolicies, KindPolicy};
use tenure_notify::{AlertMessage, NotificationChannel};
use tenure_store::{AuditEvent, AuditEventType, Entitlement, Store, StoreError};
use tenure_util::{Clock, EntitlementId, RunId, TenureError};
use tracing::{debug, info, warn};

use crate::{recompute_entitlement, record_audit};

/// Threshold whose band contains `remaining_days`, if any.
/// `thresholds` must be sorted ascending.
pub fn band_for(thresholds: &[u32], remaining_days: i64) -> Option<u32> {
    let mut lower = 0i64;
    for &threshold in thresholds {
        let upper = threshold as i64;
        if remaining_days > lower && remaining_days <= upper {
            return Some(threshold);
        }
        lower = upper;
    }
    None
}

/// Addresses an alert for `entitlement` goes to. Empty means skip.
pub fn resolve_recipients(entitlement: &Entitlement, policy: &KindPolicy) -> Vec<String> {
    let own = entitlement.recipients();
    if !own.is_empty() || policy.require_recipient {
        return own;
    }

    let mut fallback: Vec<String> = Vec::new();
    for address in &policy.fallback_recipients {
        let address = address.trim();
        if !address.is_empty() && !fallback.iter().any(|f| f.eq_ignore_ascii_case(address)) {
            fallback.push(address.to_string());
        }
    }
    fallback
}

pub struct AlertEngine {
    store: Arc<dyn Store>,
    channel: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    kinds: KindPolicies,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        kinds: KindPolicies,
    ) -> Self {
        Self {
            store,
            channel,
            clock,
            kinds,
        }
    }

    /// Evaluate every active entitlement and send the alerts that are due.
    /// Safe to call again at any time; delivered thresholds are not resent.
    pub fn run_alerts(&self) -> Result<AlertReport, TenureError> {
        let run_id = RunId::new();
        let now = self.clock.now();
        let entitlements = self.store.list_active_entitlements()?;

        let mut report = AlertReport {
            run_id: run_id.clone(),
            ..Default::default()
        };

        for mut entitlement in entitlements {
            report.evaluated += 1;
            let policy = self.kinds.get(entitlement.kind);

            if let Err(e) = recompute_entitlement(&mut entitlement, now, policy.near_expiry_days) {
                warn!(entitlement_id = %entitlement.id, error = %e, "Cannot evaluate entitlement");
                report.failed += 1;
                continue;
            }

            if entitlement.state == EntitlementState::Expired {
                continue;
            }

            let Some(threshold) = band_for(&policy.thresholds_days, entitlement.remaining_days)
            else {
                continue;
            };

            if entitlement.alerts_sent.contains(&threshold) {
                continue;
            }

            let recipients = resolve_recipients(&entitlement, policy);
            if recipients.is_empty() {
                warn!(
                    entitlement_id = %entitlement.id,
                    kind = %entitlement.kind,
                    reference = %entitlement.reference,
                    threshold_days = threshold,
                    "Alert due but no recipient; will retry"
                );
                report.skipped_no_recipient += 1;
                continue;
            }

            let message = AlertMessage {
                kind: entitlement.kind,
                reference: &entitlement.reference,
                label: &entitlement.label,
                threshold_days: threshold,
                remaining_days: entitlement.remaining_days,
                expires_at: entitlement.expires_at,
            };

            if let Err(e) = self
                .channel
                .send(&recipients, &message.subject(), &message.body())
            {
                warn!(
                    entitlement_id = %entitlement.id,
                    threshold_days = threshold,
                    channel = self.channel.name(),
                    error = %e,
                    "Alert not sent; will retry"
                );
                report.failed += 1;
                continue;
            }

            match self.mark_sent(entitlement, threshold, now) {
                Ok(saved) => {
                    info!(
                        run_id = %run_id,
                        entitlement_id = %saved.id,
                        kind = %saved.kind,
                        reference = %saved.reference,
                        threshold_days = threshold,
                        recipients = recipients.len(),
                        "Alert sent"
                    );
                    record_audit(
                        self.store.as_ref(),
                        AuditEvent::at(
                            now,
                            AuditEventType::AlertSent {
                                entitlement_id: saved.id,
                                threshold_days: threshold,
                                recipients: recipients.len(),
                            },
                        ),
                    );
                    report.sent.push(SentAlert {
                        entitlement_id: saved.id,
                        kind: saved.kind,
                        reference: saved.reference,
                        threshold_days: threshold,
                        recipients,
                    });
                }
                Err(MarkError::Rescheduled(id)) => {
                    info!(
                        entitlement_id = %id,
                        threshold_days = threshold,
                        "Alert sent but the entitlement was rescheduled meanwhile; flag dropped"
                    );
                    report.conflicts += 1;
                }
                Err(MarkError::Failed(id, e)) => {
                    warn!(
                        entitlement_id = %id,
                        threshold_days = threshold,
                        error = %e,
                        "Alert sent but the flag could not be saved"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            run_id = %run_id,
            evaluated = report.evaluated,
            sent = report.sent.len(),
            skipped = report.skipped_no_recipient,
            failed = report.failed,
            "Alert pass finished"
        );

        Ok(report)
    }

    /// Record `threshold` as delivered. A lost version race reloads the row
    /// and keeps the flag unless the anchor or duration changed, since a
    /// reschedule is what resets flags.
    fn mark_sent(
        &self,
        mut entitlement: Entitlement,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, MarkError> {
        let id = entitlement.id;
        let near_expiry_days = self.kinds.get(entitlement.kind).near_expiry_days;
        let (anchor, duration) = (entitlement.anchor, entitlement.duration);

        for attempt in 1..=MARK_ATTEMPTS {
            entitlement.alerts_sent.insert(threshold);
            match self.store.save_entitlement(&entitlement) {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Conflict(_)) => {
                    debug!(entitlement_id = %id, attempt, "Alert flag write lost a version race, reloading");
                }
                Err(e) => return Err(MarkError::Failed(id, e.into())),
            }

            entitlement = match self.store.get_entitlement(id) {
                Ok(Some(current)) => current,
                Ok(None) => {
                    return Err(MarkError::Failed(id, TenureError::not_found(format!("entitlement {}", id))));
                }
                Err(e) => return Err(MarkError::Failed(id, e.into())),
            };
            if entitlement.anchor != anchor || entitlement.duration != duration {
                return Err(MarkError::Rescheduled(id));
            }
            recompute_entitlement(&mut entitlement, now, near_expiry_days)
                .map_err(|e| MarkError::Failed(id, e.into()))?;
        }

        Err(MarkError::Failed(
            id,
            TenureError::internal(format!("alert flag for entitlement {} kept losing version races", id)),
        ))
    }
}

const MARK_ATTEMPTS: u32 = 3;

/// Why a delivered alert could not be flagged
enum MarkError {
    Rescheduled(EntitlementId),
    Failed(EntitlementId, TenureError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, entitlement, store_with};
    use tenure_api::EntitlementKind;
    use tenure_notify::{MockChannel, NotifyResult};
    use tenure_store::SqliteStore;
    use tenure_util::DurationSpec;

    /// Channel that writes to the entitlement while the mail is in flight,
    /// the way a concurrent sweep or reschedule would
    struct BusyChannel {
        store: Arc<SqliteStore>,
        inner: MockChannel,
        id: EntitlementId,
        reschedule: bool,
    }

    impl NotificationChannel for BusyChannel {
        fn name(&self) -> &'static str {
            "busy"
        }

        fn send(&self, recipients: &[String], subject: &str, body: &str) -> NotifyResult<()> {
            let mut row = self.store.get_entitlement(self.id).unwrap().unwrap();
            if self.reschedule {
                row.duration = DurationSpec::parse("2 meses").unwrap();
                row.alerts_sent.clear();
            }
            self.store.save_entitlement(&row).unwrap();
            self.inner.send(recipients, subject, body)
        }
    }

    fn engine(store: Arc<dyn Store>, channel: MockChannel, clock: Arc<dyn Clock>) -> AlertEngine {
        AlertEngine::new(store, Arc::new(channel), clock, KindPolicies::default())
    }

    #[test]
    fn bands_are_half_open() {
        let thresholds = [10, 20, 30];
        assert_eq!(band_for(&thresholds, 0), None);
        assert_eq!(band_for(&thresholds, 1), Some(10));
        assert_eq!(band_for(&thresholds, 10), Some(10));
        assert_eq!(band_for(&thresholds, 11), Some(20));
        assert_eq!(band_for(&thresholds, 20), Some(20));
        assert_eq!(band_for(&thresholds, 25), Some(30));
        assert_eq!(band_for(&thresholds, 30), Some(30));
        assert_eq!(band_for(&thresholds, 31), None);
        assert_eq!(band_for(&thresholds, -3), None);
        assert_eq!(band_for(&[30, 60], 45), Some(60));
    }

    #[test]
    fn only_the_owning_band_fires() {
        // 25 whole days remain
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let e = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes");
        let stored = store.insert_entitlement(&e).unwrap();

        let channel = MockChannel::new();
        let report = engine(store.clone(), channel.clone(), clock).run_alerts().unwrap();

        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.sent[0].threshold_days, 30);
        assert_eq!(channel.sent_count(), 1);

        let reloaded = store.get_entitlement(stored.id).unwrap().unwrap();
        assert_eq!(reloaded.alerts_sent.iter().copied().collect::<Vec<_>>(), vec![30]);
        assert_eq!(reloaded.remaining_days, 25);
    }

    #[test]
    fn delivered_threshold_is_not_resent() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();

        let channel = MockChannel::new();
        let alerts = engine(store.clone(), channel.clone(), clock.clone());
        alerts.run_alerts().unwrap();
        let second = alerts.run_alerts().unwrap();

        assert!(second.sent.is_empty());
        assert_eq!(channel.sent_count(), 1);

        // Next band fires once the clock reaches it
        clock.advance(chrono::Duration::days(6));
        let third = alerts.run_alerts().unwrap();
        assert_eq!(third.sent.len(), 1);
        assert_eq!(third.sent[0].threshold_days, 20);
    }

    #[test]
    fn transport_failure_leaves_flag_unset() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let stored = store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();

        let channel = MockChannel::failing();
        let alerts = engine(store.clone(), channel.clone(), clock);
        let report = alerts.run_alerts().unwrap();
        assert_eq!(report.failed, 1);
        assert!(store.get_entitlement(stored.id).unwrap().unwrap().alerts_sent.is_empty());

        channel.set_fail(false);
        let report = alerts.run_alerts().unwrap();
        assert_eq!(report.sent.len(), 1);
    }

    #[test]
    fn required_recipient_missing_is_skipped_without_marking() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let e = entitlement(EntitlementKind::Project, "P-1", at(2025, 1, 1, 0), "1 mes")
            .with_recipients(None, vec!["  ".into()]);
        let stored = store.insert_entitlement(&e).unwrap();

        let channel = MockChannel::new();
        let report = engine(store.clone(), channel.clone(), clock).run_alerts().unwrap();
        assert_eq!(report.skipped_no_recipient, 1);
        assert_eq!(channel.sent_count(), 0);
        assert!(store.get_entitlement(stored.id).unwrap().unwrap().alerts_sent.is_empty());
    }

    #[test]
    fn optional_recipient_falls_back() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let e = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes")
            .with_recipients(None, vec![]);
        store.insert_entitlement(&e).unwrap();

        let mut kinds = KindPolicies::default();
        kinds.certificate.fallback_recipients = vec!["ops@example.com".into()];
        let channel = MockChannel::new();
        let alerts = AlertEngine::new(store, Arc::new(channel.clone()), clock, kinds);

        let report = alerts.run_alerts().unwrap();
        assert_eq!(report.sent.len(), 1);
        assert_eq!(channel.sent()[0].recipients, vec!["ops@example.com"]);
    }

    #[test]
    fn no_fallback_means_skip() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let e = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes")
            .with_recipients(None, vec![]);
        store.insert_entitlement(&e).unwrap();

        let report = engine(store, MockChannel::new(), clock).run_alerts().unwrap();
        assert_eq!(report.skipped_no_recipient, 1);
    }

    #[test]
    fn expired_and_distant_entitlements_are_quiet() {
        let (store, clock) = store_with(at(2025, 6, 1, 0));
        store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "old", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();
        store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "new", at(2025, 6, 1, 0), "1 año"))
            .unwrap();

        let channel = MockChannel::new();
        let report = engine(store, channel.clone(), clock).run_alerts().unwrap();
        assert_eq!(report.evaluated, 2);
        assert!(report.sent.is_empty());
        assert_eq!(channel.sent_count(), 0);
    }

    #[test]
    fn concurrent_write_during_send_keeps_the_flag() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let stored = store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();

        let mock = MockChannel::new();
        let channel = BusyChannel {
            store: store.clone(),
            inner: mock.clone(),
            id: stored.id,
            reschedule: false,
        };
        let alerts = AlertEngine::new(store.clone(), Arc::new(channel), clock, KindPolicies::default());

        let first = alerts.run_alerts().unwrap();
        assert_eq!(first.sent.len(), 1);
        assert_eq!(first.conflicts, 0);
        let second = alerts.run_alerts().unwrap();
        assert!(second.sent.is_empty());
        assert_eq!(mock.sent_count(), 1);

        let reloaded = store.get_entitlement(stored.id).unwrap().unwrap();
        assert!(reloaded.alerts_sent.contains(&30));
    }

    #[test]
    fn reschedule_during_send_drops_the_flag() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let stored = store
            .insert_entitlement(&entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes"))
            .unwrap();

        let mock = MockChannel::new();
        let channel = BusyChannel {
            store: store.clone(),
            inner: mock.clone(),
            id: stored.id,
            reschedule: true,
        };
        let alerts = AlertEngine::new(store.clone(), Arc::new(channel), clock, KindPolicies::default());

        let report = alerts.run_alerts().unwrap();
        assert!(report.sent.is_empty());
        assert_eq!(report.conflicts, 1);
        assert_eq!(mock.sent_count(), 1);

        let reloaded = store.get_entitlement(stored.id).unwrap().unwrap();
        assert!(reloaded.alerts_sent.is_empty());
    }

    #[test]
    fn cancelled_entitlements_are_not_alerted() {
        let (store, clock) = store_with(at(2025, 1, 7, 0));
        let mut e = entitlement(EntitlementKind::Certificate, "C-1", at(2025, 1, 1, 0), "1 mes");
        e.active = false;
        store.insert_entitlement(&e).unwrap();

        let channel = MockChannel::new();
        let report = engine(store, channel.clone(), clock).run_alerts().unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(channel.sent_count(), 0);
    }
}
