//! Test harness for isolated coordinator tests.
//!
//! `TestHarness` owns a temp directory, an object store (in-memory by
//! default, or filesystem-backed) and a coordinator wired with a
//! `RecordingTrigger`, so tests can play the extraction worker's role.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use intake::auth::{AccessPolicy, Session};
use intake::config::IntakeConfig;
use intake::results::Invoice;
use intake::storage::{self, FsObjectStore, MemoryObjectStore, ObjectStore};
use intake::{
    Database, ExtractionTrigger, IntakeApi, IntakeCoordinator, IntakeError, Job, JobStore,
};

use super::builders::{pdf_bytes, ConfigBuilder};

/// Remembers every job it was asked to dispatch.
#[derive(Default)]
pub struct RecordingTrigger {
    dispatched: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingTrigger {
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self, job_id: &str) -> usize {
        self.dispatched().iter().filter(|id| *id == job_id).count()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionTrigger for RecordingTrigger {
    async fn dispatch(&self, job: &Job) -> Result<(), IntakeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IntakeError::StorageUnavailable("queue offline".to_string()));
        }
        self.dispatched.lock().unwrap().push(job.job_id.clone());
        Ok(())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: IntakeConfig,
    pub objects: Arc<dyn ObjectStore>,
    /// Set when the harness runs on the in-memory store.
    pub memory: Option<Arc<MemoryObjectStore>>,
    pub trigger: Arc<RecordingTrigger>,
    pub jobs: Arc<JobStore>,
    pub coordinator: Arc<IntakeCoordinator>,
    api: IntakeApi,
}

impl TestHarness {
    /// In-memory storage, no database, default thresholds.
    pub fn new() -> Self {
        Self::with_builder(ConfigBuilder::new())
    }

    /// In-memory storage with a custom config.
    pub fn with_builder(builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = builder.build();
        let memory = Arc::new(MemoryObjectStore::new());
        let objects: Arc<dyn ObjectStore> = memory.clone();
        Self::assemble(temp_dir, config, objects, Some(memory), Arc::new(JobStore::new()))
    }

    /// Filesystem storage and a SQLite database, both inside the temp dir.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self::on_disk_in(temp_dir, ConfigBuilder::new())
    }

    /// Opens storage and database under an existing directory, loading any
    /// jobs persisted by an earlier harness.
    pub fn on_disk_in(temp_dir: TempDir, builder: ConfigBuilder) -> Self {
        let storage_root = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage root");
        let db_path = temp_dir.path().join("data").join("intake.db");

        let config = builder
            .storage_root(&storage_root.to_string_lossy())
            .database_path(&db_path.to_string_lossy())
            .build();

        let objects: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::open(&storage_root).expect("Failed to open storage"));
        let db = Database::open(&db_path).expect("Failed to open database");
        let jobs = Arc::new(JobStore::with_database(db));
        jobs.load_from_database().expect("Failed to load jobs");

        Self::assemble(temp_dir, config, objects, None, jobs)
    }

    fn assemble(
        temp_dir: TempDir,
        config: IntakeConfig,
        objects: Arc<dyn ObjectStore>,
        memory: Option<Arc<MemoryObjectStore>>,
        jobs: Arc<JobStore>,
    ) -> Self {
        let trigger = Arc::new(RecordingTrigger::default());
        let coordinator = Arc::new(IntakeCoordinator::new(
            &config,
            Arc::clone(&objects),
            Arc::clone(&jobs),
            trigger.clone(),
        ));
        let api = IntakeApi::new(Arc::clone(&coordinator), AccessPolicy::from_config(&config));

        Self {
            temp_dir,
            config,
            objects,
            memory,
            trigger,
            jobs,
            coordinator,
            api,
        }
    }

    /// Hands the temp dir over, e.g. to reopen it as a "restarted" service.
    pub fn into_temp_dir(self) -> TempDir {
        self.temp_dir
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.config.storage_root)
    }

    pub fn memory(&self) -> &MemoryObjectStore {
        self.memory
            .as_deref()
            .expect("harness is not using the in-memory store")
    }

    /// Handlers sharing one session table, so sessions from
    /// [`TestHarness::session`] are accepted.
    pub fn api(&self) -> &IntakeApi {
        &self.api
    }

    /// Logs the allow-listed test principal in.
    pub fn session(&self) -> Session {
        self.api
            .login("ops@example.com", "correct horse")
            .data
            .expect("test principal should be allowed")
    }

    pub async fn submit_pdf(&self, filename: &str, size: usize) -> Job {
        let bytes = pdf_bytes(size);
        self.coordinator
            .submit(bytes.as_slice(), filename, Some("application/pdf"))
            .await
            .expect("upload should be accepted")
    }

    /// Plays the worker: writes the artifact for `job_id` to the output
    /// bucket and returns its key.
    pub async fn write_result(&self, job_id: &str, invoice: Invoice) -> String {
        let key = storage::result_key(job_id);
        let csv = invoice
            .into_artifact(job_id)
            .to_csv()
            .expect("artifact should serialize");
        self.objects
            .put(&self.config.output_bucket, &key, csv)
            .await
            .expect("result write should succeed");
        key
    }

    /// Plays the worker end to end: writes the artifact and reports it.
    pub async fn complete(&self, job_id: &str, invoice: Invoice) -> Job {
        let key = self.write_result(job_id, invoice).await;
        self.coordinator
            .mark_complete(job_id, &key)
            .await
            .expect("completion should be accepted")
    }
}
