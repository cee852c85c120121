//! Per-minute credit rating

use serde::{Deserialize, Serialize};

/// Seconds in one billable minute
pub const BILLABLE_INCREMENT_SECS: u64 = 60;

/// Fixed per-minute rate in the smallest credit unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRate {
    credits_per_minute: u64,
}

impl CreditRate {
    pub fn per_minute(credits_per_minute: u64) -> Self {
        Self { credits_per_minute }
    }

    pub fn credits_per_minute(&self) -> u64 {
        self.credits_per_minute
    }

    /// Whole minutes billed for `seconds`, rounded up
    pub fn billable_minutes(seconds: u64) -> u64 {
        seconds.div_ceil(BILLABLE_INCREMENT_SECS)
    }

    /// Cost of `seconds` of talk time
    pub fn cost_of(&self, seconds: u64) -> u64 {
        Self::billable_minutes(seconds).saturating_mul(self.credits_per_minute)
    }

    /// How many whole minutes `credits` can pay for
    pub fn affordable_minutes(&self, credits: u64) -> u64 {
        if self.credits_per_minute == 0 {
            return u64::MAX / BILLABLE_INCREMENT_SECS;
        }
        credits / self.credits_per_minute
    }
}

impl Default for CreditRate {
    fn default() -> Self {
        Self::per_minute(10)
    }
}
