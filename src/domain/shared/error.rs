//! Domain errors

use super::value_objects::TenantId;
use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Insufficient credits for tenant {tenant_id}: required {required}, available {available}")]
    InsufficientCredits {
        tenant_id: TenantId,
        required: u64,
        available: u64,
    },

    #[error("Provider rejected the call: {0}")]
    ProviderRejected(String),

    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
