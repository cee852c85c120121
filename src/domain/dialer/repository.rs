//! Dial queue repository interface

use super::queue::DialQueue;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::{QueueId, TenantId};
use async_trait::async_trait;

/// Repository interface for DialQueue aggregate
#[async_trait]
pub trait DialQueueRepository: Send + Sync {
    async fn find_by_id(&self, id: &QueueId) -> Result<Option<DialQueue>>;

    /// Save the queue with all of its entries
    async fn save(&self, queue: &DialQueue) -> Result<()>;

    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<DialQueue>>;

    /// Queues that are running or paused, oldest first
    async fn find_active(&self) -> Result<Vec<DialQueue>>;
}
