pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, validate_config};
pub use schema::{CredentialsConfig, IntakeConfig, JobsConfig, ServerConfig, UploadConfig};
