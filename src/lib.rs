//! PowerDial - metered outbound voice dialing core
//!
//! A Domain-Driven Design implementation of a credit-metered calling
//! service: a prepaid credit ledger, a per-call session state machine,
//! disposition capture and a sequential power dialer.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::{DomainError, Result};
