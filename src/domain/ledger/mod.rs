//! Credit ledger bounded context - consumable minutes per tenant

pub mod account;
pub mod rate;
pub mod repository;
pub mod reservation;

pub use account::CreditAccount;
pub use rate::CreditRate;
pub use repository::LedgerStore;
pub use reservation::{CommitReceipt, Reservation, ReservationHandle, ReservationStatus};
