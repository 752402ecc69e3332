//! Signalling the external extraction worker.

use async_trait::async_trait;

use crate::error::IntakeError;
use crate::job::Job;

/// Tells the extraction worker that a job is ready in the input bucket.
///
/// Called once when a job is first queued and again each time a failed
/// attempt is put back in the queue.
#[async_trait]
pub trait ExtractionTrigger: Send + Sync {
    async fn dispatch(&self, job: &Job) -> Result<(), IntakeError>;
}

/// For deployments where storage events start the worker on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrigger;

#[async_trait]
impl ExtractionTrigger for NoopTrigger {
    async fn dispatch(&self, job: &Job) -> Result<(), IntakeError> {
        log::debug!(
            "Job {} queued, worker is driven by storage events",
            job.job_id
        );
        Ok(())
    }
}
