use thiserror::Error as ThisError;

use crate::db::adapter::BackendKind;

/// Errors surfaced by the storage layer.
///
/// `Query` and `Migration` carry the attempted statement/version so callers
/// can log something actionable without re-deriving context. Driver and
/// transport errors convert transparently.
#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("adapter is not initialized; call initialize() first")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{operation} is not supported on the {backend} backend: {detail}")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
        detail: String,
    },

    #[error("database bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("query failed: {message}; statement: {statement}")]
    Query { statement: String, message: String },

    #[error("migration {version} failed: {message}")]
    Migration { version: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl StorageError {
    /// Wraps a driver/backend failure together with the statement it rejected.
    pub fn query(statement: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Query {
            statement: statement.into(),
            message: source.to_string(),
        }
    }

    pub fn migration(version: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Migration {
            version: version.into(),
            message: source.to_string(),
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for StorageError {
    fn is_retryable(&self) -> bool {
        // Bad statements, missing config, and unsupported ops are
        // deterministic; only transport failures are worth retrying.
        matches!(self, StorageError::Http(_))
    }
}
