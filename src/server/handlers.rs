//! JSON handlers for the operator surface.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::batch::BatchError;
use crate::queue::{AnalyzeTask, BrokerError, SearchTask, TaskMessage};
use crate::repository::RepositoryError;

/// Error envelope for the API.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl ToString) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }

    fn not_found(message: impl ToString) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        Self::internal(e)
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        Self::internal(e)
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::internal(e)
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub post_id: String,
}

/// Queue one post for batch registration.
pub async fn register_batch(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.posts.get(&body.post_id)?.is_none() {
        return Err(ApiError::not_found(format!(
            "no post with id {}",
            body.post_id
        )));
    }

    state
        .broker
        .publish(&TaskMessage::Analyze(AnalyzeTask {
            post_id: body.post_id.clone(),
        }))
        .await?;
    Ok(Json(json!({
        "message": "analysis registration queued.",
        "post_id": body.post_id,
    })))
}

/// Register every eligible post immediately.
pub async fn register_batch_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let registered = state.batcher.accumulator.register_all()?;
    Ok(Json(json!({
        "message": "all eligible posts registered.",
        "registered": registered,
    })))
}

/// Submit every pending job now.
pub async fn submit_batches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let submitted = state.batcher.submitter.submit_pending().await?;
    Ok(Json(json!({
        "message": "pending jobs submitted.",
        "submitted": submitted,
    })))
}

/// Poll every submitted job now.
pub async fn check_batches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let polled = state.batcher.poller.poll_submitted().await?;
    Ok(Json(json!({
        "message": "submitted jobs polled.",
        "polled": polled,
    })))
}

/// Download and apply every processed job now.
pub async fn complete_batches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.batcher.completer.complete_processed().await?;
    Ok(Json(serde_json::to_value(report).map_err(ApiError::internal)?))
}

/// Fail all non-completed jobs and start over with a fresh open job.
pub async fn reset_batches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let failed = state.jobs.reset()?;
    Ok(Json(json!({
        "message": "batch state reset.",
        "jobs_failed": failed,
    })))
}

/// Job-status histogram and request counts.
pub async fn batch_statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.jobs.statistics()?;
    Ok(Json(serde_json::to_value(stats).map_err(ApiError::internal)?))
}

#[derive(Deserialize)]
pub struct CrawlerRequest {
    pub keywords: Vec<String>,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    10
}

/// Kick off a search for the given keywords.
pub async fn start_crawler(
    State(state): State<AppState>,
    Json(body): Json<CrawlerRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .broker
        .publish(&TaskMessage::Search(SearchTask {
            keywords: body.keywords,
            limit: body.limit,
        }))
        .await?;
    Ok(Json(json!({ "message": "search started." })))
}

/// Overall system status.
pub async fn api_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.jobs.statistics()?;
    Ok(Json(json!({
        "posts": {
            "total": state.posts.count()?,
            "analyzed": state.posts.count_analyzed()?,
        },
        "jobs": stats.job_status_counts,
        "requests": {
            "pending": stats.pending_requests,
            "processed": stats.processed_requests,
        },
    })))
}
