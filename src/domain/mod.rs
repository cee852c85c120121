//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: CreditAccount, CallSession, DialQueue
//! - Value Objects: identifiers, phone numbers, dispositions, rates
//! - Repository Interfaces: Ports for persistence
//! - Provider Ports: telephony and lead lookup
//! - Domain Events: Things that happened to a session

pub mod dialer;
pub mod disposition;
pub mod ledger;
pub mod lead;
pub mod reporting;
pub mod session;
pub mod shared;
pub mod telephony;

// Re-export commonly used types
pub use shared::{DomainError, Result};
