//! Tenure engine

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tenure_api::{AlertReport, ExpiringGrant, SweepReport, ValidationOutcome};
use tenure_config::Policy;
use tenure_notify::NotificationChannel;
use tenure_store::Store;
use tenure_util::{Clock, TenureError};
use tracing::info;

use crate::{AlertEngine, CredentialValidator, Registry, Sweeper};

/// Wires the components to one store, clock and channel
pub struct TenureEngine {
    policy: Policy,
    store: Arc<dyn Store>,
    validator: CredentialValidator,
    sweeper: Sweeper,
    alerts: AlertEngine,
    registry: Registry,
}

impl TenureEngine {
    pub fn new(
        policy: Policy,
        store: Arc<dyn Store>,
        channel: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let kinds = policy.kinds.clone();

        info!(
            channel = channel.name(),
            certificate_thresholds = ?kinds.certificate.thresholds_days,
            project_thresholds = ?kinds.project.thresholds_days,
            "Tenure engine initialized"
        );

        Self {
            validator: CredentialValidator::new(store.clone(), clock.clone())
                .with_max_attempts(policy.service.validation_retries),
            sweeper: Sweeper::new(store.clone(), clock.clone(), kinds.clone()),
            alerts: AlertEngine::new(store.clone(), channel, clock.clone(), kinds.clone()),
            registry: Registry::new(store.clone(), clock, kinds),
            policy,
            store,
        }
    }

    /// Share the sweeper's shutdown flag with a signal handler
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.sweeper = self.sweeper.with_shutdown(shutdown);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn validator(&self) -> &CredentialValidator {
        &self.validator
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn validate(&self, identifier: &str) -> Result<ValidationOutcome, TenureError> {
        self.validator.validate(identifier)
    }

    pub fn run_sweep(&self) -> Result<SweepReport, TenureError> {
        self.sweeper.run_sweep()
    }

    pub fn run_alerts(&self) -> Result<AlertReport, TenureError> {
        self.alerts.run_alerts()
    }

    /// Expiring-soon report over the configured window
    pub fn report_expiring(&self) -> Result<Vec<ExpiringGrant>, TenureError> {
        self.sweeper
            .report_expiring(self.policy.service.report_window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, store_with};
    use tenure_api::ValidationCode;
    use tenure_notify::MockChannel;

    #[test]
    fn engine_shares_store_and_clock() {
        let (store, clock) = store_with(at(2025, 1, 1, 0));
        let engine = TenureEngine::new(
            Policy::default(),
            store,
            Arc::new(MockChannel::new()),
            clock.clone(),
        );

        engine
            .registry()
            .create_grant("AA-BB-CC-DD-EE-FF", "ACME", "10 horas", None)
            .unwrap();
        assert_eq!(
            engine.validate("AA:BB:CC:DD:EE:FF").unwrap().code,
            ValidationCode::Admissible
        );

        clock.set(at(2025, 1, 1, 11));
        let report = engine.run_sweep().unwrap();
        assert_eq!(report.grants_deactivated, 1);
        assert_eq!(
            engine.validate("AA-BB-CC-DD-EE-FF").unwrap().code,
            ValidationCode::Inactive
        );
    }

    #[test]
    fn shutdown_flag_reaches_sweeper() {
        let (store, clock) = store_with(at(2025, 1, 1, 0));
        let shutdown = Arc::new(AtomicBool::new(true));
        let engine = TenureEngine::new(
            Policy::default(),
            store,
            Arc::new(MockChannel::new()),
            clock,
        )
        .with_shutdown(shutdown);

        engine
            .registry()
            .create_grant("AA-BB-CC-DD-EE-FF", "ACME", "1 día", None)
            .unwrap();
        assert!(engine.run_sweep().unwrap().interrupted);
    }
}
