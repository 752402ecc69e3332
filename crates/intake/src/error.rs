use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by intake operations.
///
/// Every variant describes a single job or request; none of them is fatal to
/// the service. Only [`ConfigError`] (and storage failures at startup) stop
/// the process.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict on job {job_id}: {reason}")]
    Conflict { job_id: String, reason: String },

    #[error("Job {0} expired before processing finished, please retry the upload")]
    Expired(String),

    #[error("Principal '{0}' is not authorized")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl IntakeError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Returns true when retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<StorageError> for IntakeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { bucket, key } => {
                IntakeError::NotFound(format!("{}/{}", bucket, key))
            }
            StorageError::InvalidKey(key) => {
                IntakeError::invalid_input(format!("invalid storage key '{}'", key))
            }
            other => IntakeError::StorageUnavailable(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Secret resolution failed for '{name}': {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to '{path}' was abandoned before it finished")]
    Cancelled { path: PathBuf },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation timed out after {secs}s")]
    Timeout { secs: u64 },
}

pub type Result<T> = std::result::Result<T, IntakeError>;
