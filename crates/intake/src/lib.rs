pub mod api;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod document;
pub mod error;
pub mod job;
pub mod results;
pub mod secrets;
pub mod storage;
pub mod sweep;
pub mod trigger;

pub use api::{ApiResponse, IntakeApi, ResultDownload};
pub use auth::{AccessPolicy, Session};
pub use config::{apply_env_overrides, load_config, load_config_from_str, IntakeConfig};
pub use coordinator::IntakeCoordinator;
pub use db::{Database, DatabaseError};
pub use document::{Document, UploadPolicy};
pub use error::{ConfigError, IntakeError, Result, StorageError};
pub use job::{Job, JobStatus, JobStore};
pub use results::{Invoice, InvoiceTotals, LineItem, ResultArtifact, ResultPage, ResultSummary, ResultsQuery};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, StorageCredentials};
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use sweep::SweepScheduler;
pub use trigger::{ExtractionTrigger, NoopTrigger};
