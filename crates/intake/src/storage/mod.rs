//! Bucket-style object storage.
//!
//! The adapters are deliberately thin: no retries, no timeouts. Both belong to
//! [`crate::coordinator::IntakeCoordinator`].

pub mod filesystem;
pub mod memory;

pub use filesystem::FsObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;

use crate::error::StorageError;

/// Prefix for uploaded invoice documents in the input bucket.
pub const INPUT_PREFIX: &str = "facturas/";
/// Prefix for extraction results in the output bucket.
pub const RESULT_PREFIX: &str = "resultados/";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Keys under `prefix`, in lexicographic order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Removes an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

pub fn input_key(storage_key: &str) -> String {
    format!("{}{}", INPUT_PREFIX, storage_key)
}

pub fn result_key(job_id: &str) -> String {
    format!("{}{}.csv", RESULT_PREFIX, job_id)
}

/// Rejects keys that could escape the bucket or address nothing.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_bucket(bucket: &str) -> Result<(), StorageError> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.')
    {
        Err(StorageError::InvalidKey(bucket.to_string()))
    } else {
        Ok(())
    }
}
