use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Uploading,
    Queued,
    Processing,
    Succeeded,
    Failed,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "uploading" => Some(JobStatus::Uploading),
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Expired
        )
    }

    /// Jobs waiting on the extraction worker. Only these can expire.
    pub fn is_awaiting_worker(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    /// Whether the job has left the upload phase and must be persisted.
    pub fn is_committed(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Uploading)
    }

    /// The transition table. Callbacks may skip the Processing report, so a
    /// Queued job can complete or fail directly. `Queued -> Queued` is the
    /// retry edge taken when a failure is reported before pick-up.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Queued)
                | (Uploading, Queued)
                | (Queued, Processing)
                | (Queued, Queued)
                | (Queued, Succeeded)
                | (Queued, Failed)
                | (Queued, Expired)
                | (Processing, Queued)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Processing, Expired)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of recording a failed extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in the queue; the worker should be signalled again.
    Requeued { attempt: u32 },
    /// Retries exhausted.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub document: Document,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Failed extraction attempts so far.
    pub retry_count: u32,
}

impl Job {
    pub fn new(document: Document, now: DateTime<Utc>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            document,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result_ref: None,
            error_detail: None,
            retry_count: 0,
        }
    }

    fn advance(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn begin_upload(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Uploading, now)
    }

    pub fn enqueue(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Queued, now)
    }

    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Processing, now)
    }

    /// Sets the result reference together with the Succeeded status, the only
    /// state in which `result_ref` is present.
    pub fn succeed(
        &mut self,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Succeeded, now)?;
        self.result_ref = Some(result_ref.to_string());
        self.error_detail = None;
        Ok(())
    }

    /// Counts a failed attempt. Reaching `max_retries` failures is terminal.
    pub fn record_failure(
        &mut self,
        reason: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, InvalidTransition> {
        let failures = self.retry_count + 1;
        let next = if failures >= max_retries {
            JobStatus::Failed
        } else {
            JobStatus::Queued
        };
        self.advance(next, now)?;
        self.retry_count = failures;
        self.error_detail = Some(reason.to_string());

        Ok(match next {
            JobStatus::Failed => FailureOutcome::Failed,
            _ => FailureOutcome::Requeued { attempt: failures },
        })
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Expired, now)?;
        self.error_detail = Some("processing timed out, please retry".to_string());
        Ok(())
    }

    /// True when the job has waited on the worker for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status.is_awaiting_worker() && now - self.updated_at > timeout
    }
}
