//! Request handlers for the presentation layer's polling protocol.
//!
//! Every user-facing handler checks the session against the issuing
//! [`AccessPolicy`] first and answers with an [`ApiResponse`] carrying an
//! HTTP-style status code. The `worker_*` handlers carry the extraction
//! worker's callbacks and take no session.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncRead;

use crate::auth::{AccessPolicy, Session};
use crate::coordinator::IntakeCoordinator;
use crate::error::IntakeError;
use crate::job::Job;
use crate::results::{ResultArtifact, ResultPage, ResultsQuery};

pub const STATUS_OK: u16 = 200;

/// Response wrapper for API calls.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            status: STATUS_OK,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn from_error(err: &IntakeError) -> Self {
        Self::err(status_code(err), err.to_string())
    }

    pub fn from_result(result: Result<T, IntakeError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

pub fn status_code(err: &IntakeError) -> u16 {
    match err {
        IntakeError::InvalidInput { .. } => 400,
        IntakeError::Unauthorized(_) => 401,
        IntakeError::NotFound(_) => 404,
        IntakeError::Conflict { .. } => 409,
        IntakeError::Expired(_) => 410,
        IntakeError::StorageUnavailable(_) | IntakeError::Database(_) => 503,
    }
}

/// A result artifact ready to be saved by the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDownload {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

pub fn download_filename(job_id: &str) -> String {
    format!("factura_procesada_{}.csv", job_id)
}

pub struct IntakeApi {
    coordinator: Arc<IntakeCoordinator>,
    policy: AccessPolicy,
}

impl IntakeApi {
    pub fn new(coordinator: Arc<IntakeCoordinator>, policy: AccessPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    pub fn login(&self, principal: &str, password: &str) -> ApiResponse<Session> {
        ApiResponse::from_result(self.policy.open_session(principal, password))
    }

    /// Resolves a bearer token to the session it was issued for.
    pub fn resume(&self, token: &str) -> ApiResponse<Session> {
        ApiResponse::from_result(self.policy.resume(token))
    }

    pub fn logout(&self, session: &Session) -> ApiResponse<bool> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::ok(self.policy.close_session(session.token()))
    }

    /// `POST upload`
    pub async fn upload<R>(
        &self,
        session: &Session,
        reader: R,
        filename: &str,
        content_type: Option<&str>,
    ) -> ApiResponse<Job>
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::from_result(self.coordinator.submit(reader, filename, content_type).await)
    }

    /// `GET status/{jobId}`
    pub fn get_status(&self, session: &Session, job_id: &str) -> ApiResponse<Job> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::from_result(self.coordinator.get_status(job_id))
    }

    /// `GET results?since=&limit=&offset=`
    pub fn list_results(&self, session: &Session, query: &ResultsQuery) -> ApiResponse<ResultPage> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::from_result(self.coordinator.list_results(query))
    }

    /// `GET results/{jobId}` as parsed rows, for on-screen review.
    pub async fn view_result(&self, session: &Session, job_id: &str) -> ApiResponse<ResultArtifact> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::from_result(self.coordinator.fetch_result(job_id).await)
    }

    /// `GET results/{jobId}/download`
    pub async fn download_result(
        &self,
        session: &Session,
        job_id: &str,
    ) -> ApiResponse<ResultDownload> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }

        let result = self
            .coordinator
            .fetch_result_csv(job_id)
            .await
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|_| IntakeError::Conflict {
                    job_id: job_id.to_string(),
                    reason: "result artifact is not valid UTF-8".to_string(),
                })
            })
            .map(|content| ResultDownload {
                filename: download_filename(job_id),
                content_type: "text/csv".to_string(),
                content,
            });
        ApiResponse::from_result(result)
    }

    /// `GET results/files`
    pub async fn list_result_files(&self, session: &Session) -> ApiResponse<Vec<String>> {
        if let Err(e) = self.policy.check(session) {
            return ApiResponse::from_error(&e);
        }
        ApiResponse::from_result(self.coordinator.list_result_files(None).await)
    }

    /// `POST worker/jobs/{jobId}/processing`
    pub async fn worker_processing(&self, job_id: &str) -> ApiResponse<Job> {
        ApiResponse::from_result(self.coordinator.mark_processing(job_id).await)
    }

    /// `POST worker/jobs/{jobId}/complete`
    pub async fn worker_complete(&self, job_id: &str, result_ref: &str) -> ApiResponse<Job> {
        ApiResponse::from_result(self.coordinator.mark_complete(job_id, result_ref).await)
    }

    /// `POST worker/jobs/{jobId}/failed`
    pub async fn worker_failed(&self, job_id: &str, reason: &str) -> ApiResponse<Job> {
        ApiResponse::from_result(self.coordinator.mark_failed(job_id, reason).await)
    }
}
