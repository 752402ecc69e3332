use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    pub version: String,
    pub input_bucket: String,
    pub output_bucket: String,
    /// Root directory of the filesystem-backed object store.
    pub storage_root: String,
    /// SQLite file for job persistence. Jobs live only in memory when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub authorized_principals: Vec<String>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_secs: u64,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_timeout() -> u64 {
    30
}

impl IntakeConfig {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of failed attempts after which a job is terminally Failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Queued/Processing jobs untouched for longer than this are expired.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_job_timeout() -> u64 {
    15 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            job_timeout_secs: default_job_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl JobsConfig {
    pub fn job_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// References to the storage credentials. Each secret may be given directly,
/// as a file path, or as the name of an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default = "default_access_key_env")]
    pub access_key_id_env_var: Option<String>,
    #[serde(default)]
    pub secret_access_key_file: Option<String>,
    #[serde(default = "default_secret_key_env")]
    pub secret_access_key_env_var: Option<String>,
    #[serde(default = "default_session_token_env")]
    pub session_token_env_var: Option<String>,
}

fn default_access_key_env() -> Option<String> {
    Some("AWS_ACCESS_KEY_ID".to_string())
}

fn default_secret_key_env() -> Option<String> {
    Some("AWS_SECRET_ACCESS_KEY".to_string())
}

fn default_session_token_env() -> Option<String> {
    Some("AWS_SESSION_TOKEN".to_string())
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            access_key_id_env_var: default_access_key_env(),
            secret_access_key_file: None,
            secret_access_key_env_var: default_secret_key_env(),
            session_token_env_var: default_session_token_env(),
        }
    }
}

/// HTTP surface of the `intaked` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Environment variable holding the bearer token the extraction worker
    /// presents on its callbacks. Callbacks are unauthenticated when it is
    /// unset or empty.
    #[serde(default = "default_worker_token_env")]
    pub worker_token_env_var: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_worker_token_env() -> Option<String> {
    Some("INTAKE_WORKER_TOKEN".to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            worker_token_env_var: default_worker_token_env(),
        }
    }
}
