//! Uploaded documents and the upload allow-list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::UploadConfig;
use crate::error::IntakeError;

const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

/// Immutable reference to an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Vec<String>,
    max_size_bytes: u64,
}

impl UploadPolicy {
    pub fn new(allowed_extensions: Vec<String>, max_size_bytes: u64) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            max_size_bytes,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.allowed_extensions.clone(), config.max_size_bytes)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Validates the filename and returns `(basename, lowercase extension)`.
    /// Directory components supplied by the client are dropped.
    pub fn check_filename(&self, filename: &str) -> Result<(String, String), IntakeError> {
        let basename = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        if basename.is_empty() {
            return Err(IntakeError::invalid_input("filename is empty"));
        }

        let extension = match basename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
            _ => {
                return Err(IntakeError::invalid_input(format!(
                    "'{}' has no file extension",
                    basename
                )))
            }
        };

        if !self.allowed_extensions.iter().any(|e| *e == extension) {
            return Err(IntakeError::invalid_input(format!(
                "extension '.{}' is not allowed (allowed: {})",
                extension,
                self.allowed_extensions.join(", ")
            )));
        }

        Ok((basename, extension))
    }

    pub fn check_size(&self, size_bytes: u64) -> Result<(), IntakeError> {
        if size_bytes == 0 {
            return Err(IntakeError::invalid_input("file is empty"));
        }
        if size_bytes > self.max_size_bytes {
            return Err(IntakeError::invalid_input(format!(
                "file is {} bytes, maximum is {} bytes",
                size_bytes, self.max_size_bytes
            )));
        }
        Ok(())
    }
}

/// Uses the caller's content type unless it is missing or generic, in which
/// case it is guessed from the filename.
pub fn resolve_content_type(filename: &str, provided: Option<&str>) -> String {
    match provided.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != GENERIC_CONTENT_TYPE => ct.to_string(),
        _ => mime_guess::from_path(filename)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| GENERIC_CONTENT_TYPE.to_string()),
    }
}

/// Builds a storage key from the content hash, the upload time and a random
/// suffix: `<sha256[..16]>-<unix millis>-<8 hex>.<ext>`.
///
/// Two uploads with the same name never share a key, even with identical
/// bytes in the same millisecond.
pub fn storage_key(content: &[u8], extension: &str, now: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(content));
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.{}",
        &digest[..16],
        now.timestamp_millis(),
        &nonce[..8],
        extension
    )
}
