use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! from_err {
    ($err:ty, $operation:expr) => {
        impl From<$err> for AppError {
            fn from(e: $err) -> Self {
                Self::StoreError {
                    operation: $operation.to_string(),
                    entity_type: UNKNOWN.to_string(),
                    message: e.to_string(),
                }
            }
        }
    };
}

const UNKNOWN: &str = "unknown";

/// Error kind that callers branch on instead of message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No visible record matched
    NotFound,
    /// A uniqueness constraint was violated
    Conflict,
    /// Input was rejected before any I/O
    Validation,
    /// Any underlying failure not otherwise classified
    Store,
    /// The caller cancelled the operation or its deadline passed
    Cancelled,
}

/// Standardized data-access error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Store error during {operation} on {entity_type}: {message}")]
    StoreError {
        operation: String,
        entity_type: String,
        message: String,
    },
    #[error("Operation {operation} cancelled: {reason}")]
    Cancelled { operation: String, reason: String },

    // Port failures. Repositories log these and degrade; they never reach callers.
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Audit error: {0}")]
    AuditError(String),
}

from_err!(serde_json::Error, "serialize");
from_err!(sqlx::migrate::MigrateError, "migrate");

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFoundError("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConflictError(db_err.message().to_string())
            }
            _ => Self::StoreError {
                operation: UNKNOWN.to_string(),
                entity_type: UNKNOWN.to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl AppError {
    /// Create a new not found error
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Display) -> Self {
        Self::NotFoundError(format!("{} with ID {} not found", entity_type.into(), entity_id))
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConflictError(message.into())
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Create a new store error
    pub fn store(
        operation: impl Into<String>,
        entity_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StoreError {
            operation: operation.into(),
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a new cache port error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheError(message.into())
    }

    /// Create a new audit port error
    pub fn audit(message: impl Into<String>) -> Self {
        Self::AuditError(message.into())
    }

    /// Attach the operation and entity type to an error that lacks them.
    ///
    /// The kind never changes; only store errors carry this context.
    pub fn in_operation(self, operation: &str, entity_type: &str) -> Self {
        match self {
            Self::StoreError {
                operation: op,
                entity_type: et,
                message,
            } => Self::StoreError {
                operation: if op == UNKNOWN { operation.to_string() } else { op },
                entity_type: if et == UNKNOWN { entity_type.to_string() } else { et },
                message,
            },
            other => other,
        }
    }

    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFoundError(_) => ErrorKind::NotFound,
            Self::ConflictError(_) => ErrorKind::Conflict,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::StoreError { .. } | Self::CacheError(_) | Self::AuditError(_) => ErrorKind::Store,
        }
    }

    /// HTTP-equivalent status an API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Cancelled => 499,
            ErrorKind::Store => 500,
        }
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StoreError { .. } | Self::CacheError(_))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Log this error with structured logging
    pub fn log(&self) {
        match self {
            Self::StoreError {
                operation,
                entity_type,
                ..
            } => {
                tracing::error!(
                    kind = ?self.kind(),
                    operation = %operation,
                    entity_type = %entity_type,
                    retriable = %self.is_retriable(),
                    "{}", self
                );
            }
            Self::CacheError(_) | Self::AuditError(_) => {
                tracing::warn!(kind = ?self.kind(), "{}", self);
            }
            _ => {
                tracing::debug!(kind = ?self.kind(), "{}", self);
            }
        }
    }
}

pub type Result<T, E = AppError> = core::result::Result<T, E>;
