//! Telephony provider adapters

pub mod simulated;

pub use simulated::{SimulatedBehaviour, SimulatedCall, SimulatedProvider};
