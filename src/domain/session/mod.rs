//! Call session bounded context - lifecycle of one outbound call

pub mod aggregate;
pub mod event;
pub mod repository;
pub mod value_object;

pub use aggregate::CallSession;
pub use event::{SessionEvent, SessionEventKind};
pub use repository::SessionRepository;
pub use value_object::{FailureReason, SessionState};
