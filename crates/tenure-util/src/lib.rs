//! Shared utilities for tenure
//!
//! This crate provides:
//! - ID types (GrantId, EntitlementId, RunId) and the normalized MacAddress
//! - Duration specs and the free-text duration parser
//! - Wall-clock access (mock time, injectable clocks)
//! - Error types
//! - Default paths for config and data directories

mod duration;
mod error;
mod ids;
mod paths;
mod time;

pub use duration::*;
pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
