//! Shared fixtures for unit tests

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tenure_api::EntitlementKind;
use tenure_store::{AuditEvent, Entitlement, Grant, SqliteStore, Store, StoreError, StoreResult};
use tenure_util::{DurationSpec, EntitlementId, GrantId, MacAddress, ManualClock};

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn grant(mac: &str, anchor: DateTime<Utc>, duration: &str) -> Grant {
    Grant::new(
        MacAddress::parse(mac).unwrap(),
        "ACME",
        anchor,
        DurationSpec::parse(duration).unwrap(),
    )
}

pub fn entitlement(
    kind: EntitlementKind,
    reference: &str,
    anchor: DateTime<Utc>,
    duration: &str,
) -> Entitlement {
    Entitlement::new(
        kind,
        reference,
        format!("{} {}", kind, reference),
        anchor,
        DurationSpec::parse(duration).unwrap(),
    )
    .with_recipients(Some("owner@example.com".into()), vec![])
}

pub fn store_with(now: DateTime<Utc>) -> (Arc<SqliteStore>, Arc<ManualClock>) {
    (
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(ManualClock::new(now)),
    )
}

/// In-memory store that can lose grant write races a fixed number of times
/// and fail entitlement listings on demand
pub struct FaultyStore {
    inner: SqliteStore,
    grant_conflicts: Mutex<u32>,
    entitlement_listing_fails: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            grant_conflicts: Mutex::new(0),
            entitlement_listing_fails: AtomicBool::new(false),
        }
    }

    pub fn with_grant_conflicts(self, conflicts: u32) -> Self {
        *self.grant_conflicts.lock().unwrap() = conflicts;
        self
    }

    pub fn fail_entitlement_listing(&self, fail: bool) {
        self.entitlement_listing_fails.store(fail, Ordering::SeqCst);
    }

    fn listing(&self) -> StoreResult<()> {
        if self.entitlement_listing_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Database("disk I/O error".into()));
        }
        Ok(())
    }
}

impl Store for FaultyStore {
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        self.inner.append_audit(event)
    }
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.inner.get_recent_audits(limit)
    }
    fn insert_grant(&self, grant: &Grant) -> StoreResult<Grant> {
        self.inner.insert_grant(grant)
    }
    fn get_grant(&self, id: GrantId) -> StoreResult<Option<Grant>> {
        self.inner.get_grant(id)
    }
    fn find_grant_by_identifier(&self, identifier: &MacAddress) -> StoreResult<Option<Grant>> {
        self.inner.find_grant_by_identifier(identifier)
    }
    fn list_grants(&self) -> StoreResult<Vec<Grant>> {
        self.inner.list_grants()
    }
    fn list_active_grants(&self) -> StoreResult<Vec<Grant>> {
        self.inner.list_active_grants()
    }
    fn save_grant(&self, grant: &Grant) -> StoreResult<Grant> {
        let mut left = self.grant_conflicts.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(StoreError::Conflict("grants".into()));
        }
        self.inner.save_grant(grant)
    }
    fn delete_grant(&self, id: GrantId) -> StoreResult<bool> {
        self.inner.delete_grant(id)
    }
    fn insert_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement> {
        self.inner.insert_entitlement(entitlement)
    }
    fn get_entitlement(&self, id: EntitlementId) -> StoreResult<Option<Entitlement>> {
        self.inner.get_entitlement(id)
    }
    fn find_entitlement(
        &self,
        kind: EntitlementKind,
        reference: &str,
    ) -> StoreResult<Option<Entitlement>> {
        self.inner.find_entitlement(kind, reference)
    }
    fn list_entitlements(&self) -> StoreResult<Vec<Entitlement>> {
        self.listing()?;
        self.inner.list_entitlements()
    }
    fn list_active_entitlements(&self) -> StoreResult<Vec<Entitlement>> {
        self.listing()?;
        self.inner.list_active_entitlements()
    }
    fn save_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement> {
        self.inner.save_entitlement(entitlement)
    }
    fn delete_entitlement(&self, id: EntitlementId) -> StoreResult<bool> {
        self.inner.delete_entitlement(id)
    }
    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}
