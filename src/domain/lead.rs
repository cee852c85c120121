//! Lead store port
//!
//! Leads are owned elsewhere; the core reads phone numbers and writes back
//! only `last_contacted_at`.

use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of a lead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_ref: LeadRef,
    pub phone_number: PhoneNumber,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub last_contacted_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find(&self, lead_ref: &LeadRef) -> Result<Option<Lead>>;

    /// Record that a dial to this lead was initiated
    async fn touch_last_contacted(&self, lead_ref: &LeadRef, at: DateTime<Utc>) -> Result<()>;
}
