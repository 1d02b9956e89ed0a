//! Store trait definitions

use tenure_api::EntitlementKind;
use tenure_util::{EntitlementId, GrantId, MacAddress};

use crate::{AuditEvent, Entitlement, Grant, StoreResult};

/// Main store trait
///
/// Every `save_*` is a single guarded write: it succeeds only if the row
/// still carries the version it was read with, and returns the row with
/// its new version. A lost race is [`StoreError::Conflict`](crate::StoreError::Conflict).
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Grants

    /// Insert a new grant; the identifier must be unused
    fn insert_grant(&self, grant: &Grant) -> StoreResult<Grant>;

    fn get_grant(&self, id: GrantId) -> StoreResult<Option<Grant>>;

    fn find_grant_by_identifier(&self, identifier: &MacAddress) -> StoreResult<Option<Grant>>;

    fn list_grants(&self) -> StoreResult<Vec<Grant>>;

    fn list_active_grants(&self) -> StoreResult<Vec<Grant>>;

    fn save_grant(&self, grant: &Grant) -> StoreResult<Grant>;

    /// Returns false if no such row existed
    fn delete_grant(&self, id: GrantId) -> StoreResult<bool>;

    // Entitlements

    /// Insert a new entitlement; (kind, reference) must be unused
    fn insert_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement>;

    fn get_entitlement(&self, id: EntitlementId) -> StoreResult<Option<Entitlement>>;

    fn find_entitlement(
        &self,
        kind: EntitlementKind,
        reference: &str,
    ) -> StoreResult<Option<Entitlement>>;

    fn list_entitlements(&self) -> StoreResult<Vec<Entitlement>>;

    /// Entitlements that have not been cancelled
    fn list_active_entitlements(&self) -> StoreResult<Vec<Entitlement>>;

    fn save_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement>;

    /// Returns false if no such row existed
    fn delete_entitlement(&self, id: EntitlementId) -> StoreResult<bool>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
