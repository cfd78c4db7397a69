//! Unified error handling
//!
//! # Error code ranges
//!
//! | Code  | Meaning |
//! |-------|---------|
//! | E0003 | Resource not found |
//! | E0004 | Version conflict |
//! | E0006 | Invalid request/payload |
//! | E9001 | Internal error |
//! | E9002 | Database error |

/// Application error enum
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Peer closed the connection; expected during normal client churn
    #[error("Client disconnected")]
    ClientDisconnected,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable code string, carried in command acks
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E0003",
            Self::Conflict(_) => "E0004",
            Self::Invalid(_) => "E0006",
            Self::Database(_) => "E9002",
            Self::Internal(_) | Self::ClientDisconnected => "E9001",
        }
    }
}

impl From<shared::message::TransportError> for AppError {
    fn from(err: shared::message::TransportError) -> Self {
        match err {
            shared::message::TransportError::Disconnected => Self::ClientDisconnected,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".into()),
            other => Self::Database(other.to_string()),
        }
    }
}

/// Result type for server operations
pub type AppResult<T> = Result<T, AppError>;
