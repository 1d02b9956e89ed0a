//! Credential validation
//!
//! Guard clauses run in order and each call ends in exactly one code:
//! INVALID_FORMAT (no storage access), NOT_FOUND, INACTIVE (no write),
//! EXPIRED (flag cleared and saved) or ADMISSIBLE (last-validated stamped
//! and saved). A lost version race reloads the row and re-runs the lookup.

use std::sync::Arc;
use tenure_api::{GrantState, ValidationCode, ValidationOutcome};
use tenure_store::{AuditEvent, AuditEventType, DeactivationSource, Store, StoreError};
use tenure_util::{Clock, MacAddress, TenureError};
use tracing::{debug, info, warn};

use crate::{ExpiryError, evaluate_grant, record_audit};

/// Why a single attempt did not produce an outcome
enum AttemptError {
    Conflict,
    Failed(TenureError),
}

impl From<StoreError> for AttemptError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) => AttemptError::Conflict,
            other => AttemptError::Failed(other.into()),
        }
    }
}

impl From<ExpiryError> for AttemptError {
    fn from(e: ExpiryError) -> Self {
        AttemptError::Failed(e.into())
    }
}

pub struct CredentialValidator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl CredentialValidator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_attempts: tenure_config::DEFAULT_VALIDATION_RETRIES,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Validate a presented identifier.
    ///
    /// Business outcomes are codes; `Err` is reserved for storage failures
    /// and exhausted retries, neither of which leaves a partial write.
    pub fn validate(&self, raw: &str) -> Result<ValidationOutcome, TenureError> {
        let identifier = match MacAddress::parse(raw) {
            Ok(identifier) => identifier,
            Err(e) => {
                debug!(error = %e, "Rejected malformed identifier");
                return Ok(ValidationOutcome::rejected(ValidationCode::InvalidFormat));
            }
        };

        for attempt in 1..=self.max_attempts {
            match self.attempt(&identifier) {
                Ok(outcome) => {
                    debug!(identifier = %identifier, code = %outcome.code, attempt, "Validation finished");
                    return Ok(outcome);
                }
                Err(AttemptError::Conflict) => {
                    debug!(identifier = %identifier, attempt, "Grant changed underneath validation, retrying");
                }
                Err(AttemptError::Failed(e)) => {
                    warn!(identifier = %identifier, error = %e, "Validation failed");
                    return Err(TenureError::internal(format!(
                        "validation of {} failed: {}",
                        identifier, e
                    )));
                }
            }
        }

        warn!(identifier = %identifier, attempts = self.max_attempts, "Validation retries exhausted");
        Err(TenureError::internal(format!(
            "validation of {} kept losing version races after {} attempts",
            identifier, self.max_attempts
        )))
    }

    fn attempt(&self, identifier: &MacAddress) -> Result<ValidationOutcome, AttemptError> {
        let Some(mut grant) = self.store.find_grant_by_identifier(identifier)? else {
            return Ok(ValidationOutcome::rejected(ValidationCode::NotFound));
        };

        let now = self.clock.now();
        let evaluation = evaluate_grant(&grant, now)?;

        match evaluation.state {
            GrantState::Inactive => Ok(ValidationOutcome::rejected(ValidationCode::Inactive)),

            GrantState::Expired => {
                grant.active = false;
                self.store.save_grant(&grant)?;

                info!(
                    grant_id = %grant.id,
                    identifier = %grant.identifier,
                    expired_at = %evaluation.expires_at,
                    "Grant deactivated on validation"
                );
                record_audit(
                    self.store.as_ref(),
                    AuditEvent::at(
                        now,
                        AuditEventType::GrantDeactivated {
                            grant_id: grant.id,
                            identifier: grant.identifier.clone(),
                            expired_at: evaluation.expires_at,
                            source: DeactivationSource::Validation,
                        },
                    ),
                );

                Ok(ValidationOutcome::rejected(ValidationCode::Expired))
            }

            GrantState::Admissible => {
                grant.last_validated_at = Some(now);
                self.store.save_grant(&grant)?;

                Ok(ValidationOutcome::admitted(grant.owner, evaluation.remaining))
            }
        }
    }
}
