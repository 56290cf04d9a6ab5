use thiserror::Error;
use uuid::Uuid;

use crate::types::RecordRef;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

/// Manual Clone implementation for DbError
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::ConnectionPool(s) => DbError::ConnectionPool(s.clone()),
            DbError::Transaction(s) => DbError::Transaction(s.clone()),
            DbError::Migration(s) => DbError::Migration(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Entity store and domain-level errors
#[derive(Debug, Error, Clone)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Entity not found: {0} with ID {1}")]
    EntityNotFound(String, Uuid),

    #[error("Cannot perform operation on deleted entity: {0} with ID {1}")]
    DeletedEntity(String, Uuid),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The on-disk schema cannot be brought to the version this build expects.
    #[error("Schema incompatible: database at version {found}, application supports up to {supported}: {reason}")]
    SchemaIncompatible {
        found: i64,
        supported: i64,
        reason: String,
    },

    /// A row points at a parent that does not exist (yet) in the local store.
    #[error("Referential violation writing {table} {id}: {detail}")]
    ReferentialViolation {
        table: String,
        id: Uuid,
        detail: String,
    },

    /// A pulled row collides on a unique column with a different synced local row.
    #[error("Unique conflict writing {table} {id}: {detail}")]
    UniqueConflict {
        table: String,
        id: Uuid,
        detail: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(error: serde_json::Error) -> Self {
        DomainError::Serialization(error.to_string())
    }
}

/// Service-level errors (bootstrap and configuration)
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Sync-specific errors
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Sync timeout")]
    Timeout,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Schema incompatible: {0}")]
    SchemaIncompatible(String),

    #[error("Referential violation: {0}")]
    ReferentialViolation(String),

    #[error("Unique conflict: {0}")]
    UniqueConflict(String),

    #[error("Push partially failed for {} record(s)", .failed.len())]
    PartialPushFailure { failed: Vec<RecordRef> },

    #[error("Local database error: {0}")]
    Local(DomainError),

    #[error("Sync cancelled")]
    Cancelled,
}

impl From<DomainError> for SyncError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::SchemaIncompatible { .. } => SyncError::SchemaIncompatible(error.to_string()),
            DomainError::ReferentialViolation { .. } => SyncError::ReferentialViolation(error.to_string()),
            DomainError::UniqueConflict { .. } => SyncError::UniqueConflict(error.to_string()),
            other => SyncError::Local(other),
        }
    }
}

impl SyncError {
    /// Fatal errors block synchronisation until the application is updated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::SchemaIncompatible(_))
    }

    /// Transient errors are retried silently with backoff.
    pub fn is_transient(&self) -> bool {
        !self.is_fatal() && !matches!(self, SyncError::Cancelled)
    }
}

/// Validation errors
#[derive(Debug, Error, Clone)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' must be at least {min} characters")]
    MinLength { field: String, min: usize },

    #[error("Field '{field}' cannot exceed {max} characters")]
    MaxLength { field: String, max: usize },

    #[error("Field '{field}' contains invalid format: {reason}")]
    Format { field: String, reason: String },

    #[error("Field '{field}' must be unique")]
    Unique { field: String },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Validation error: {0}")]
    Custom(String),
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn min_length(field: &str, min: usize) -> Self {
        Self::MinLength {
            field: field.to_string(),
            min,
        }
    }

    pub fn max_length(field: &str, max: usize) -> Self {
        Self::MaxLength {
            field: field.to_string(),
            max,
        }
    }

    pub fn format(field: &str, reason: &str) -> Self {
        Self::Format {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unique(field: &str) -> Self {
        Self::Unique {
            field: field.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn custom(message: &str) -> Self {
        Self::Custom(message.to_string())
    }
}
