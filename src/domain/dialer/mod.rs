//! Power dialer bounded context - sequential dialling through a lead list

pub mod queue;
pub mod repository;

pub use queue::{DialQueue, DialQueueEntry, InFlight, QueueStatus};
pub use repository::DialQueueRepository;
