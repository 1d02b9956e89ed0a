//! Expiry engine for tenure
//!
//! This crate is the heart of tenure, containing:
//! - Expiry arithmetic (fixed and calendar modes)
//! - Lifecycle classification of grants and entitlements
//! - Credential validation with optimistic retries
//! - Threshold alerts for entitlements
//! - The periodic sweep and the expiring-soon report
//! - Grant and entitlement management

mod alerts;
mod engine;
mod expiry;
mod lifecycle;
mod registry;
mod sweeper;
mod validator;

#[cfg(test)]
mod testing;

pub use alerts::*;
pub use engine::*;
pub use expiry::*;
pub use lifecycle::*;
pub use registry::*;
pub use sweeper::*;
pub use validator::*;

use tenure_store::{AuditEvent, Store};

/// Append an audit event; a failed append is logged and otherwise ignored
pub(crate) fn record_audit(store: &dyn Store, event: AuditEvent) {
    if let Err(e) = store.append_audit(event) {
        tracing::warn!(error = %e, "Failed to append audit event");
    }
}
