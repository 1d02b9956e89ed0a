//! Shared domain types for tenure
//!
//! This crate defines the vocabulary passed between the tenure crates and
//! shown to operators:
//! - Lifecycle states for grants and entitlements
//! - Validation result codes and outcomes
//! - Remaining-time breakdowns
//! - Read-only views and batch reports

mod types;

pub use types::*;

/// Current schema version of the serialized views and reports
pub const API_VERSION: u32 = 1;
