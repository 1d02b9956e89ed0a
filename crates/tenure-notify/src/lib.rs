//! Notification channels for tenure
//!
//! This crate defines the interface the alert engine delivers through and
//! its implementations:
//! - SMTP relay (lettre)
//! - Disabled channel, for deployments without mail
//! - Recording mock, for tests

mod mock;
mod smtp;
mod templates;
mod traits;

pub use mock::*;
pub use smtp::*;
pub use templates::*;
pub use traits::*;
