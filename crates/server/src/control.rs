//! Scheduler control-plane endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use dialcast_queue::{CancelOutcome, Job, JobPriority, JobState};
use dialcast_scheduler::{DelaySpec, ScheduleCallRequest, SchedulerError};

use crate::state::AppState;

fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Queue(dialcast_queue::QueueError::InvalidCron { .. }) => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::Queue(dialcast_queue::QueueError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn internal(err: SchedulerError) -> StatusCode {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Control plane operation failed");
    }
    status
}

#[derive(Debug, Serialize)]
pub struct JobIdResponse {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub family: String,
    pub state: JobState,
    pub progress: u8,
    pub payload: serde_json::Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            family: job.family.as_str().to_string(),
            state: job.state,
            progress: job.progress,
            payload: job.payload,
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            result: job.result,
            created_at: job.created_at,
            scheduled_at: job.scheduled_at,
            finished_at: job.finished_at,
        }
    }
}

pub async fn schedule_immediate(
    State(state): State<AppState>,
    Json(request): Json<ScheduleCallRequest>,
) -> Result<Json<JobIdResponse>, StatusCode> {
    let job_id = state
        .scheduler
        .schedule_immediate(request)
        .await
        .map_err(internal)?;
    Ok(Json(JobIdResponse { job_id }))
}

#[derive(Debug, Deserialize)]
pub struct DelayedRequest {
    #[serde(flatten)]
    pub call: ScheduleCallRequest,
    #[serde(flatten)]
    pub when: DelaySpec,
}

pub async fn schedule_delayed(
    State(state): State<AppState>,
    Json(request): Json<DelayedRequest>,
) -> Result<Json<JobIdResponse>, StatusCode> {
    let job_id = state
        .scheduler
        .schedule_delayed(request.call, request.when)
        .await
        .map_err(internal)?;
    Ok(Json(JobIdResponse { job_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRequest {
    #[serde(flatten)]
    pub call: ScheduleCallRequest,
    pub cron_expression: String,
}

pub async fn schedule_recurring(
    State(state): State<AppState>,
    Json(request): Json<RecurringRequest>,
) -> Result<Json<JobIdResponse>, StatusCode> {
    let job_id = state
        .scheduler
        .schedule_recurring(request.call, &request.cron_expression)
        .await
        .map_err(internal)?;
    Ok(Json(JobIdResponse { job_id }))
}

pub async fn schedule_bulk(
    State(state): State<AppState>,
    Json(requests): Json<Vec<ScheduleCallRequest>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let job_ids = state
        .scheduler
        .schedule_bulk(requests)
        .await
        .map_err(internal)?;
    let count = job_ids.len();
    Ok(Json(serde_json::json!({ "jobIds": job_ids, "count": count })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefillRequest {
    pub cron_expression: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_refill_limit")]
    pub lead_limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRefillRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_refill_limit")]
    pub lead_limit: u32,
}

fn default_refill_limit() -> u32 {
    50
}

pub async fn schedule_refill(
    State(state): State<AppState>,
    Json(request): Json<RefillRequest>,
) -> Result<Json<JobIdResponse>, StatusCode> {
    let job_id = state
        .scheduler
        .schedule_refill(
            &request.cron_expression,
            request.message,
            request.priority,
            request.lead_limit,
        )
        .await
        .map_err(internal)?;
    Ok(Json(JobIdResponse { job_id }))
}

pub async fn run_refill_now(
    State(state): State<AppState>,
    Json(request): Json<RunRefillRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let report = state
        .scheduler
        .run_refill_now(request.message, request.priority, request.lead_limit)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({
        "scheduled": report.scheduled,
        "jobIds": report.job_ids,
    })))
}

pub async fn list_schedules(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let schedules = state.scheduler.list_schedules().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "schedules": schedules })))
}

pub async fn stop_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    if state
        .scheduler
        .stop_schedule(&job_id)
        .await
        .map_err(internal)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, StatusCode> {
    let job = state
        .scheduler
        .get_job(&job_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let outcome = state
        .scheduler
        .cancel_job(&job_id)
        .await
        .map_err(internal)?;

    match outcome {
        CancelOutcome::Removed => Ok(Json(serde_json::json!({ "canceled": true }))),
        CancelOutcome::Signaled => Ok(Json(serde_json::json!({
            "canceled": false,
            "signaled": true,
        }))),
        CancelOutcome::NotFound => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.scheduler.retry_job(&job_id).await.map_err(internal)? {
        Ok(Json(serde_json::json!({ "retried": true })))
    } else {
        Err(StatusCode::CONFLICT)
    }
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let counts = state.scheduler.stats().await.map_err(internal)?;
    Ok(Json(serde_json::to_value(counts).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: JobState,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

fn default_list_limit() -> u32 {
    50
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let jobs = state
        .scheduler
        .list_by_state(query.state, query.offset, query.limit.min(500))
        .await
        .map_err(internal)?;

    let jobs: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanRequest {
    pub grace_ms: u64,
    #[serde(default = "default_clean_limit")]
    pub limit: u32,
    pub state: JobState,
}

fn default_clean_limit() -> u32 {
    1_000
}

pub async fn clean(
    State(state): State<AppState>,
    Json(request): Json<CleanRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let removed = state
        .scheduler
        .clean(request.grace_ms, request.limit, request.state)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn pause(State(state): State<AppState>) -> StatusCode {
    state.scheduler.pause();
    StatusCode::NO_CONTENT
}

pub async fn resume(State(state): State<AppState>) -> StatusCode {
    state.scheduler.resume();
    StatusCode::NO_CONTENT
}
