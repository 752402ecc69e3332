//! The intake coordinator: uploads, job tracking and worker callbacks.
//!
//! Every job mutation goes through [`JobStore::update`], which holds the
//! job's own lock for the whole read-check-write, so a worker callback and a
//! concurrent sweep can never both act on the same job state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::IntakeConfig;
use crate::document::{self, Document, UploadPolicy};
use crate::error::{IntakeError, Result, StorageError};
use crate::job::{FailureOutcome, InvalidTransition, Job, JobStatus, JobStore};
use crate::results::{ResultArtifact, ResultPage, ResultsQuery};
use crate::storage::{self, ObjectStore, RESULT_PREFIX};
use crate::trigger::ExtractionTrigger;

fn transition_conflict(job_id: &str, err: InvalidTransition) -> IntakeError {
    IntakeError::Conflict {
        job_id: job_id.to_string(),
        reason: err.to_string(),
    }
}

/// Removes the pending job and the partially written object unless the
/// upload is committed. Runs on every exit path of `submit`, including the
/// caller dropping the future mid-write.
struct UploadGuard {
    jobs: Arc<JobStore>,
    objects: Arc<dyn ObjectStore>,
    job_id: String,
    bucket: String,
    key: String,
    committed: bool,
}

impl UploadGuard {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        if self.jobs.discard_uncommitted(&self.job_id) {
            log::info!("Discarded uncommitted job {}", self.job_id);
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "No runtime to clean up {}/{}; object may be orphaned",
                self.bucket,
                self.key
            );
            return;
        };

        let objects = Arc::clone(&self.objects);
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = objects.delete(&bucket, &key).await {
                log::warn!("Failed to remove abandoned upload {}/{}: {}", bucket, key, e);
            }
        });
    }
}

pub struct IntakeCoordinator {
    objects: Arc<dyn ObjectStore>,
    jobs: Arc<JobStore>,
    trigger: Arc<dyn ExtractionTrigger>,
    policy: UploadPolicy,
    input_bucket: String,
    output_bucket: String,
    max_retries: u32,
    job_timeout: chrono::Duration,
    storage_timeout: Duration,
}

impl IntakeCoordinator {
    pub fn new(
        config: &IntakeConfig,
        objects: Arc<dyn ObjectStore>,
        jobs: Arc<JobStore>,
        trigger: Arc<dyn ExtractionTrigger>,
    ) -> Self {
        Self {
            objects,
            jobs,
            trigger,
            policy: UploadPolicy::from_config(&config.upload),
            input_bucket: config.input_bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            max_retries: config.jobs.max_retries,
            job_timeout: config.jobs.job_timeout(),
            storage_timeout: config.storage_timeout(),
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn output_bucket(&self) -> &str {
        &self.output_bucket
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.storage_timeout, fut).await {
            Ok(result) => result.map_err(IntakeError::from),
            Err(_) => Err(StorageError::Timeout {
                secs: self.storage_timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Lists both buckets once. Used at startup, where failure is fatal.
    pub async fn probe_storage(&self) -> Result<()> {
        self.with_timeout(self.objects.list(&self.input_bucket, storage::INPUT_PREFIX))
            .await?;
        self.with_timeout(self.objects.list(&self.output_bucket, RESULT_PREFIX))
            .await?;
        Ok(())
    }

    async fn dispatch(&self, job: &Job) {
        if let Err(e) = self.trigger.dispatch(job).await {
            // The sweep expires the job if the worker never hears about it.
            log::warn!("Failed to signal worker for job {}: {}", job.job_id, e);
        }
    }

    /// Accepts an upload, stores it under the input prefix and queues a job.
    ///
    /// The returned job is always `Queued`. On any failure no job remains and
    /// the input object is removed.
    #[tracing::instrument(skip(self, reader, content_type), fields(op = "submit"))]
    pub async fn submit<R>(
        &self,
        reader: R,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<Job>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (basename, extension) = self.policy.check_filename(filename)?;

        let limit = self.policy.max_size_bytes();
        let mut bytes = Vec::new();
        reader
            .take(limit.saturating_add(1))
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| IntakeError::invalid_input(format!("upload stream failed: {}", e)))?;
        self.policy.check_size(bytes.len() as u64)?;

        let now = Utc::now();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            content_type: document::resolve_content_type(&basename, content_type),
            size_bytes: bytes.len() as u64,
            storage_key: document::storage_key(&bytes, &extension, now),
            original_filename: basename,
        };
        let key = storage::input_key(&document.storage_key);
        let job = Job::new(document, now);
        let job_id = job.job_id.clone();

        self.jobs.insert_uncommitted(job)?;
        let guard = UploadGuard {
            jobs: Arc::clone(&self.jobs),
            objects: Arc::clone(&self.objects),
            job_id: job_id.clone(),
            bucket: self.input_bucket.clone(),
            key: key.clone(),
            committed: false,
        };

        self.jobs.update(&job_id, |job| {
            job.begin_upload(Utc::now())
                .map_err(|e| transition_conflict(&job_id, e))
        })?;

        if let Err(e) = self
            .with_timeout(self.objects.put(&self.input_bucket, &key, bytes))
            .await
        {
            log::warn!("Upload of {} failed: {}", key, e);
            return Err(match e {
                IntakeError::InvalidInput { .. } => e,
                other => IntakeError::StorageUnavailable(other.to_string()),
            });
        }

        let (_, job) = self.jobs.update(&job_id, |job| {
            job.enqueue(Utc::now())
                .map_err(|e| transition_conflict(&job_id, e))
        })?;
        guard.commit();

        log::info!(
            "Queued job {} for '{}' ({} bytes)",
            job.job_id,
            job.document.original_filename,
            job.document.size_bytes
        );
        self.dispatch(&job).await;
        Ok(job)
    }

    /// Runs a worker callback against one job, logging unknown job IDs.
    fn callback<T, F>(&self, job_id: &str, f: F) -> Result<(T, Job)>
    where
        F: FnOnce(&mut Job) -> Result<T>,
    {
        self.jobs.update(job_id, f).inspect_err(|e| match e {
            IntakeError::NotFound(_) => log::warn!("Callback for unknown job {}", job_id),
            IntakeError::Conflict { job_id, reason } => {
                log::error!("Conflicting callback for job {}: {}", job_id, reason)
            }
            _ => {}
        })
    }

    /// The worker picked the job up (Queued -> Processing).
    #[tracing::instrument(skip(self), fields(op = "mark_processing"))]
    pub async fn mark_processing(&self, job_id: &str) -> Result<Job> {
        let (_, job) = self.callback(job_id, |job| {
            match job.status {
                JobStatus::Processing => {
                    log::debug!("Job {} is already processing", job_id);
                }
                status if status.is_terminal() => {
                    log::warn!("Ignoring pick-up of job {} in terminal state {}", job_id, status);
                }
                _ => job
                    .start_processing(Utc::now())
                    .map_err(|e| transition_conflict(job_id, e))?,
            }
            Ok(())
        })?;
        Ok(job)
    }

    /// Records the worker's result. Repeating the same `result_ref` is a
    /// no-op; a different one on a succeeded job is a `Conflict`.
    #[tracing::instrument(skip(self), fields(op = "mark_complete"))]
    pub async fn mark_complete(&self, job_id: &str, result_ref: &str) -> Result<Job> {
        let result_ref = result_ref.trim();
        if result_ref.is_empty() {
            return Err(IntakeError::invalid_input("result reference is empty"));
        }
        storage::validate_key(result_ref)?;

        let (_, job) = self.callback(job_id, |job| {
            match job.status {
                JobStatus::Succeeded => {
                    if job.result_ref.as_deref() != Some(result_ref) {
                        return Err(IntakeError::Conflict {
                            job_id: job_id.to_string(),
                            reason: format!(
                                "already succeeded with '{}', got '{}'",
                                job.result_ref.as_deref().unwrap_or_default(),
                                result_ref
                            ),
                        });
                    }
                    log::debug!("Duplicate completion for job {}", job_id);
                }
                JobStatus::Failed | JobStatus::Expired => {
                    log::warn!(
                        "Ignoring completion of job {} in terminal state {}",
                        job_id,
                        job.status
                    );
                }
                _ => job
                    .succeed(result_ref, Utc::now())
                    .map_err(|e| transition_conflict(job_id, e))?,
            }
            Ok(())
        })?;

        if job.status == JobStatus::Succeeded {
            log::info!("Job {} succeeded with {}", job_id, result_ref);
        }
        Ok(job)
    }

    /// Records a failed attempt. The job goes back to the queue until
    /// `max_retries` failures, then fails for good.
    #[tracing::instrument(skip(self, reason), fields(op = "mark_failed"))]
    pub async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<Job> {
        let max_retries = self.max_retries;
        let (outcome, job) = self.callback(job_id, |job| {
            if job.status.is_terminal() {
                log::warn!(
                    "Ignoring failure of job {} in terminal state {}",
                    job_id,
                    job.status
                );
                return Ok(None);
            }
            job.record_failure(reason, max_retries, Utc::now())
                .map(Some)
                .map_err(|e| transition_conflict(job_id, e))
        })?;

        match outcome {
            Some(FailureOutcome::Requeued { attempt }) => {
                log::info!(
                    "Job {} failed attempt {}/{}, requeued: {}",
                    job_id,
                    attempt,
                    max_retries,
                    reason
                );
                self.dispatch(&job).await;
            }
            Some(FailureOutcome::Failed) => {
                log::warn!(
                    "Job {} failed after {} attempts: {}",
                    job_id,
                    job.retry_count,
                    reason
                );
            }
            None => {}
        }
        Ok(job)
    }

    pub fn get_status(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| IntakeError::NotFound(format!("job {}", job_id)))
    }

    pub fn list_results(&self, query: &ResultsQuery) -> Result<ResultPage> {
        Ok(self.jobs.query_results(query)?)
    }

    /// Moves every job that has waited on the worker for longer than the job
    /// timeout to `Expired`. Returns the expired job IDs.
    #[tracing::instrument(skip(self), fields(op = "expire_stale_jobs"))]
    pub fn expire_stale_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.job_timeout;
        let candidates = self
            .jobs
            .ids_with_status(&[JobStatus::Queued, JobStatus::Processing]);

        let mut expired = Vec::new();
        for job_id in candidates {
            let result = self.jobs.update(&job_id, |job| {
                if !job.is_stale(now, timeout) {
                    return Ok(false);
                }
                job.expire(now)
                    .map_err(|e| transition_conflict(&job_id, e))?;
                Ok(true)
            });

            match result {
                Ok((true, _)) => expired.push(job_id),
                Ok((false, _)) => {}
                Err(e) => log::error!("Failed to expire job {}: {}", job_id, e),
            }
        }

        if !expired.is_empty() {
            log::info!("Expired {} stale job(s)", expired.len());
        }
        expired
    }

    /// Raw CSV bytes of a succeeded job's artifact.
    pub async fn fetch_result_csv(&self, job_id: &str) -> Result<Vec<u8>> {
        let job = self.get_status(job_id)?;
        match (job.status, job.result_ref.as_deref()) {
            (JobStatus::Succeeded, Some(result_ref)) => {
                self.with_timeout(self.objects.get(&self.output_bucket, result_ref))
                    .await
            }
            (JobStatus::Expired, _) => Err(IntakeError::Expired(job_id.to_string())),
            (status, _) => Err(IntakeError::NotFound(format!(
                "result for job {} ({})",
                job_id, status
            ))),
        }
    }

    pub async fn fetch_result(&self, job_id: &str) -> Result<ResultArtifact> {
        let bytes = self.fetch_result_csv(job_id).await?;
        let artifact = ResultArtifact::from_csv(job_id, &bytes)?;
        log::debug!(
            "Read result for job {}: {} rows, {} line items",
            job_id,
            artifact.rows.len(),
            artifact.item_count()
        );
        Ok(artifact)
    }

    /// CSV keys in the output bucket under `prefix` (the result prefix by
    /// default), whether or not a job references them.
    pub async fn list_result_files(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.unwrap_or(RESULT_PREFIX);
        let keys = self
            .with_timeout(self.objects.list(&self.output_bucket, prefix))
            .await?;
        Ok(keys.into_iter().filter(|k| k.ends_with(".csv")).collect())
    }
}
