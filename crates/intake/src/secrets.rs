//! Storage credential resolution.
//!
//! Every secret can come from one of three places, checked in this order:
//!
//! 1. **Direct value** in the config file (local testing only)
//! 2. **File** containing the value (Docker/Kubernetes secret mounts)
//! 3. **Environment variable** holding the value

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::config::CredentialsConfig;
use crate::error::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Resolves a secret from the first configured source. Values read from files
/// or the environment are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = non_empty(direct) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = non_empty(file_path) {
        let content = std::fs::read_to_string(path).map_err(|e| SecretError::FileReadError {
            path: path.to_string(),
            source: e,
        })?;
        return Ok(SecretString::from(content.trim().to_string()));
    }

    if let Some(name) = non_empty(env_var) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an unset env var or a missing source yields
/// `None` instead of an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Credentials for the object storage backend.
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub region: String,
}

impl StorageCredentials {
    /// Resolves all credentials. The access key and the secret key are
    /// required; the session token is optional.
    pub fn resolve(config: &CredentialsConfig, region: &str) -> std::result::Result<Self, ConfigError> {
        let access_key_id = resolve_secret(
            config.access_key_id.as_deref(),
            None,
            config.access_key_id_env_var.as_deref(),
        )
        .map_err(|source| ConfigError::Secret {
            name: "access_key_id".to_string(),
            source,
        })?;

        let secret_access_key = resolve_secret(
            None,
            config.secret_access_key_file.as_deref(),
            config.secret_access_key_env_var.as_deref(),
        )
        .map_err(|source| ConfigError::Secret {
            name: "secret_access_key".to_string(),
            source,
        })?;

        let session_token =
            resolve_secret_optional(None, None, config.session_token_env_var.as_deref()).map_err(
                |source| ConfigError::Secret {
                    name: "session_token".to_string(),
                    source,
                },
            )?;

        Ok(Self {
            access_key_id: access_key_id.expose_secret().to_string(),
            secret_access_key,
            session_token,
            region: region.to_string(),
        })
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"****")
            .field("session_token", &self.session_token.as_ref().map(|_| "****"))
            .field("region", &self.region)
            .finish()
    }
}
