//! Session repository interface

use super::aggregate::CallSession;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::{SessionId, TenantId};
use async_trait::async_trait;

/// Repository interface for CallSession aggregate
///
/// Sessions are saved on every transition and archived, never deleted,
/// once terminal.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Find a session by its ID
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CallSession>>;

    /// Save a session (insert or update)
    async fn save(&self, session: &CallSession) -> Result<()>;

    /// Sessions that are not yet Closed or Failed
    async fn find_unfinished(&self) -> Result<Vec<CallSession>>;

    /// All sessions of a tenant, newest first
    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>>;
}
