//! Call session use cases - one actor per live session

mod actor;
mod context;
mod manager;

pub use context::SessionSettings;
pub use manager::{CallSessionManager, StartCallRequest};
