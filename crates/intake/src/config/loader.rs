use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::IntakeConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IntakeConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IntakeConfig, ConfigError> {
    let config: IntakeConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Overlays `INTAKE_*` environment variables onto a loaded config and
/// re-validates the result.
///
/// | Variable | Field |
/// |----------|-------|
/// | `INTAKE_INPUT_BUCKET` | `input_bucket` |
/// | `INTAKE_OUTPUT_BUCKET` | `output_bucket` |
/// | `INTAKE_STORAGE_ROOT` | `storage_root` |
/// | `INTAKE_DATABASE_PATH` | `database_path` |
/// | `INTAKE_AUTHORIZED_PRINCIPALS` | `authorized_principals` (comma separated) |
/// | `INTAKE_MAX_UPLOAD_BYTES` | `upload.max_size_bytes` |
/// | `INTAKE_MAX_RETRIES` | `jobs.max_retries` |
/// | `INTAKE_JOB_TIMEOUT_SECS` | `jobs.job_timeout_secs` |
/// | `INTAKE_SWEEP_INTERVAL_SECS` | `jobs.sweep_interval_secs` |
/// | `INTAKE_STORAGE_TIMEOUT_SECS` | `storage_timeout_secs` |
/// | `INTAKE_LISTEN_ADDR` | `server.listen_addr` |
/// | `AWS_DEFAULT_REGION` | `region` |
pub fn apply_env_overrides(mut config: IntakeConfig) -> Result<IntakeConfig, ConfigError> {
    if let Some(v) = env_string("INTAKE_INPUT_BUCKET") {
        config.input_bucket = v;
    }
    if let Some(v) = env_string("INTAKE_OUTPUT_BUCKET") {
        config.output_bucket = v;
    }
    if let Some(v) = env_string("INTAKE_STORAGE_ROOT") {
        config.storage_root = v;
    }
    if let Some(v) = env_string("INTAKE_DATABASE_PATH") {
        config.database_path = Some(v);
    }
    if let Some(v) = env_string("AWS_DEFAULT_REGION") {
        config.region = v;
    }
    if let Some(v) = env_string("INTAKE_AUTHORIZED_PRINCIPALS") {
        config.authorized_principals = v
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Some(v) = env_parsed("INTAKE_MAX_UPLOAD_BYTES")? {
        config.upload.max_size_bytes = v;
    }
    if let Some(v) = env_parsed("INTAKE_MAX_RETRIES")? {
        config.jobs.max_retries = v;
    }
    if let Some(v) = env_parsed("INTAKE_JOB_TIMEOUT_SECS")? {
        config.jobs.job_timeout_secs = v;
    }
    if let Some(v) = env_parsed("INTAKE_SWEEP_INTERVAL_SECS")? {
        config.jobs.sweep_interval_secs = v;
    }
    if let Some(v) = env_parsed("INTAKE_STORAGE_TIMEOUT_SECS")? {
        config.storage_timeout_secs = v;
    }
    if let Some(v) = env_string("INTAKE_LISTEN_ADDR") {
        config.server.listen_addr = v;
    }

    validate_config(&config)?;
    Ok(config)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &IntakeConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.input_bucket.trim().is_empty() {
        return Err(invalid("input_bucket must not be empty"));
    }
    if config.output_bucket.trim().is_empty() {
        return Err(invalid("output_bucket must not be empty"));
    }
    if config.input_bucket == config.output_bucket {
        return Err(invalid("input_bucket and output_bucket must differ"));
    }
    if config.storage_root.trim().is_empty() {
        return Err(invalid("storage_root must not be empty"));
    }

    if config.upload.allowed_extensions.is_empty() {
        return Err(invalid("upload.allowed_extensions must not be empty"));
    }
    for ext in &config.upload.allowed_extensions {
        if ext.is_empty() || ext.contains('.') || ext.to_lowercase() != *ext {
            return Err(invalid(format!(
                "Extension '{}' must be lowercase without a leading dot",
                ext
            )));
        }
    }
    if config.upload.max_size_bytes == 0 {
        return Err(invalid("upload.max_size_bytes must be greater than 0"));
    }

    if config.jobs.max_retries == 0 {
        return Err(invalid("jobs.max_retries must be at least 1"));
    }
    if config.jobs.job_timeout_secs == 0 {
        return Err(invalid("jobs.job_timeout_secs must be greater than 0"));
    }
    if config.jobs.sweep_interval_secs == 0 {
        return Err(invalid("jobs.sweep_interval_secs must be greater than 0"));
    }
    if config.storage_timeout_secs == 0 {
        return Err(invalid("storage_timeout_secs must be greater than 0"));
    }

    if config.authorized_principals.is_empty() {
        return Err(invalid("authorized_principals must list at least one principal"));
    }

    if config.server.listen_addr.parse::<SocketAddr>().is_err() {
        return Err(invalid(format!(
            "server.listen_addr '{}' is not a socket address",
            config.server.listen_addr
        )));
    }

    Ok(())
}
