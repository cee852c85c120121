//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod dial_queue_repository;
#[cfg(feature = "postgres")]
pub mod follow_up_repository;
#[cfg(feature = "postgres")]
pub mod ledger_repository;
#[cfg(feature = "postgres")]
pub mod session_repository;

pub use memory::{
    InMemoryDialQueueRepository, InMemoryFollowUpRepository, InMemoryLeadStore,
    InMemoryLedgerStore, InMemorySessionRepository,
};

#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations, DatabaseConfig};
#[cfg(feature = "postgres")]
pub use dial_queue_repository::PgDialQueueRepository;
#[cfg(feature = "postgres")]
pub use follow_up_repository::PgFollowUpRepository;
#[cfg(feature = "postgres")]
pub use ledger_repository::PgLedgerStore;
#[cfg(feature = "postgres")]
pub use session_repository::PgSessionRepository;
