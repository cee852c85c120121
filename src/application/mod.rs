//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Serializing writes per tenant account, per session and per queue
//! - Coordinating the ledger, sessions and queues
//! - Publishing domain events

pub mod disposition;
pub mod events;
pub mod ledger;
pub mod power_dialer;
pub mod session;

pub use disposition::{DispositionCapture, DispositionOutcome, DispositionSubmission};
pub use events::{DialerEvent, EventBroadcaster};
pub use ledger::CreditLedger;
pub use power_dialer::PowerDialer;
pub use session::{CallSessionManager, SessionSettings, StartCallRequest};
