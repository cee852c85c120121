//! Disposition bounded context - call outcomes and follow-ups

pub mod follow_up;
pub mod value_object;

pub use follow_up::{FollowUp, FollowUpRepository};
pub use value_object::Disposition;
