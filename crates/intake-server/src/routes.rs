//! HTTP routes for the intake service.
//!
//! `/api/*` serves the presentation layer's polling protocol and requires a
//! bearer session token from `POST /api/login`. `/worker/*` carries the
//! extraction worker's callbacks and requires the worker token when one is
//! configured. Every body is an [`ApiResponse`] whose `status` is also the
//! HTTP status, except the CSV download.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use intake::{ApiResponse, IntakeApi, ResultsQuery, Session};

/// Room for multipart framing on top of the largest accepted document.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<IntakeApi>,
    pub worker_token: Option<Arc<SecretString>>,
    pub max_upload_bytes: usize,
}

/// An [`ApiResponse`] sent with its own status code.
pub struct Reply<T>(pub ApiResponse<T>);

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

fn reject(status: u16, message: impl Into<String>) -> Response {
    Reply(ApiResponse::<()>::err(status, message)).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn session(state: &AppState, headers: &HeaderMap) -> Result<Session, Response> {
    let token = bearer(headers).ok_or_else(|| reject(401, "missing bearer token"))?;
    let resumed = state.api.resume(token);
    match resumed.data {
        Some(session) => Ok(session),
        None => Err(reject(
            resumed.status,
            resumed.error.unwrap_or_else(|| "unauthorized".to_string()),
        )),
    }
}

fn check_worker(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.worker_token.as_deref() else {
        return Ok(());
    };
    match bearer(headers) {
        Some(token) if token == expected.expose_secret() => Ok(()),
        _ => {
            log::warn!("Rejected worker callback with a missing or wrong token");
            Err(reject(401, "invalid worker token"))
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/upload", post(upload))
        .route("/status/:job_id", get(get_status))
        .route("/results", get(list_results))
        .route("/results/files", get(list_result_files))
        .route("/results/:job_id", get(view_result))
        .route("/results/:job_id/download", get(download_result));

    let worker = Router::new()
        .route("/jobs/:job_id/processing", post(worker_processing))
        .route("/jobs/:job_id/complete", post(worker_complete))
        .route("/jobs/:job_id/failed", post(worker_failed));

    Router::new()
        .nest("/api", api)
        .nest("/worker", worker)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Presentation layer ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub principal: String,
    pub password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    Reply(state.api.login(&body.principal, &body.password)).into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    Reply(state.api.logout(&session)).into_response()
}

/// `POST /api/upload`, multipart with the document in a `file` field.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return reject(400, "missing 'file' field"),
            Err(e) => return reject(400, format!("multipart error: {}", e)),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return reject(400, format!("failed to read upload: {}", e)),
        };

        return Reply(
            state
                .api
                .upload(&session, &bytes[..], &filename, content_type.as_deref())
                .await,
        )
        .into_response();
    }
}

async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    Reply(state.api.get_status(&session, &job_id)).into_response()
}

async fn list_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    Reply(state.api.list_results(&session, &query)).into_response()
}

async fn list_result_files(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    Reply(state.api.list_result_files(&session).await).into_response()
}

async fn view_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    Reply(state.api.view_result(&session, &job_id).await).into_response()
}

/// The CSV itself on success, an [`ApiResponse`] otherwise.
async fn download_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response {
    let session = match session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let reply = state.api.download_result(&session, &job_id).await;
    match reply.data {
        Some(download) => (
            [
                (header::CONTENT_TYPE, download.content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", download.filename),
                ),
            ],
            download.content,
        )
            .into_response(),
        None => Reply(reply).into_response(),
    }
}

// ─── Extraction worker ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub result_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct FailedRequest {
    pub error: String,
}

async fn worker_processing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response {
    if let Err(response) = check_worker(&state, &headers) {
        return response;
    }
    Reply(state.api.worker_processing(&job_id).await).into_response()
}

async fn worker_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Response {
    if let Err(response) = check_worker(&state, &headers) {
        return response;
    }
    Reply(state.api.worker_complete(&job_id, &body.result_ref).await).into_response()
}

async fn worker_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(body): Json<FailedRequest>,
) -> Response {
    if let Err(response) = check_worker(&state, &headers) {
        return response;
    }
    Reply(state.api.worker_failed(&job_id, &body.error).await).into_response()
}
