// HTTP route handlers for the judge API

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use judge_common::types::{Language, Submission, SubmissionStatus};
use judge_common::{metrics, RateLimitStats, RateLimitedService};
use judge_worker::evaluator::EXECUTION_FAILED_MESSAGE;
use judge_worker::{EnqueueOutcome, ExecutionUnit, SandboxStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::rate_limit::{apply_rate_limit_headers, gate};
use crate::AppState;

const MAX_CODE_BYTES: usize = 64 * 1024;
const MAX_CUSTOM_INPUTS: usize = 10;

fn parse_language(raw: &str) -> Result<Language, ApiError> {
    Language::parse(raw).ok_or_else(|| {
        let supported: Vec<String> = Language::all_variants()
            .iter()
            .map(|l| l.to_string())
            .collect();
        ApiError::Validation(format!(
            "Unsupported language '{}'. Supported: {}",
            raw,
            supported.join(", ")
        ))
    })
}

fn validate_code(code: &str) -> Result<(), ApiError> {
    if code.trim().is_empty() {
        return Err(ApiError::Validation("Code must not be empty".to_string()));
    }
    if code.len() > MAX_CODE_BYTES {
        return Err(ApiError::Validation(format!(
            "Code exceeds {} bytes",
            MAX_CODE_BYTES
        )));
    }
    Ok(())
}

fn parse_submission_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(format!("Invalid submission id '{}'", raw)))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub problem_id: String,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSubmissionResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

/// POST /submissions - Create a PENDING submission and queue it
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<CreateSubmissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let language = parse_language(&payload.language)?;
    validate_code(&payload.code)?;

    if state.store.get_problem(&payload.problem_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Problem {} not found",
            payload.problem_id
        )));
    }

    let mut submission = Submission::new(
        caller.user_id.clone(),
        payload.problem_id,
        language,
        payload.code,
    );
    state.store.save_submission(&submission).await?;

    if let Err(e) = state.queue.enqueue(submission.id) {
        warn!(submission_id = %submission.id, error = %e, "Failed to queue submission");
        submission.fail(format!("not queued: {}", e), Utc::now());
        state.store.save_submission(&submission).await?;
        return Err(e.into());
    }

    metrics::record_submission_enqueued(&language.to_string());
    info!(
        submission_id = %submission.id,
        user_id = %caller.user_id,
        %language,
        problem_id = %submission.problem_id,
        "Submission queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateSubmissionResponse {
            submission_id: submission.id,
            status: submission.status,
        }),
    ))
}

/// GET /submissions/:id - Poll a submission (owner or admin)
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Submission>, ApiError> {
    let id = parse_submission_id(&id)?;
    let mut submission = state
        .store
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {} not found", id)))?;

    if submission.user_id != caller.user_id && !caller.is_admin {
        return Err(ApiError::Forbidden);
    }
    if !caller.is_admin {
        submission.diagnostic = None;
    }

    Ok(Json(submission))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,
    pub problem_id: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<String>,
    #[serde(default)]
    pub stdin: String,
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub status: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: &'static str,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub results: Vec<RunResult>,
}

/// POST /execute - Run code against custom inputs without grading
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let language = parse_language(&payload.language)?;
    validate_code(&payload.code)?;

    let inputs = if payload.test_cases.is_empty() {
        vec![payload.stdin]
    } else {
        payload.test_cases
    };
    if inputs.len() > MAX_CUSTOM_INPUTS {
        return Err(ApiError::Validation(format!(
            "At most {} inputs per run",
            MAX_CUSTOM_INPUTS
        )));
    }

    let problem = match payload.problem_id.as_deref() {
        Some(problem_id) => Some(
            state
                .store
                .get_problem(problem_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Problem {} not found", problem_id)))?,
        ),
        None => None,
    };
    let time_limit_ms = state
        .config
        .effective_time_limit(problem.as_ref().map(|p| p.time_limit_ms).unwrap_or(0));
    let function_name = problem.as_ref().and_then(|p| p.function_name.as_deref());
    let parser = problem
        .as_ref()
        .and_then(|p| p.parsers.get(&language))
        .map(String::as_str);

    let mut results = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let unit = ExecutionUnit {
            language,
            code: &payload.code,
            input: input.as_str(),
            function_name,
            parser,
            time_limit_ms,
        };

        let result = match state.engine.execute(&unit).await {
            Ok(output) => {
                let (stdout, stderr) = if output.status == SandboxStatus::Success {
                    (output.output, String::new())
                } else {
                    (String::new(), output.output)
                };
                RunResult {
                    status: output.status.as_str().to_string(),
                    stdout,
                    stderr,
                    error: None,
                    execution_time_ms: output.execution_time_ms,
                    memory_used_kb: output.memory_used_kb,
                }
            }
            Err(e) => {
                error!(%language, error = %e, "Custom run dispatch failed");
                metrics::record_dispatch_failure(&language.to_string(), e.kind());
                RunResult {
                    status: "error".to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(EXECUTION_FAILED_MESSAGE.to_string()),
                    execution_time_ms: 0,
                    memory_used_kb: 0,
                }
            }
        };
        results.push(result);
    }

    let failed = results.iter().any(|r| r.status != SandboxStatus::Success.as_str());
    let (stdout, stderr) = results
        .first()
        .map(|r| (r.stdout.clone(), r.stderr.clone()))
        .unwrap_or_default();

    Ok(Json(ExecuteResponse {
        status: if failed { "error" } else { "success" },
        stdout,
        stderr,
        execution_time_ms: results.iter().map(|r| r.execution_time_ms).max().unwrap_or(0),
        results,
    }))
}

/// GET /rate-limits - Usage per service for the caller
pub async fn rate_limit_stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<Vec<RateLimitStats>>, ApiError> {
    let stats = state.limiter.stats_at(&caller.subject(), Utc::now()).await?;
    Ok(Json(stats))
}

fn parse_user_service(raw: &str) -> Result<RateLimitedService, ApiError> {
    match RateLimitedService::parse(raw) {
        Some(RateLimitedService::GuestCreation) | None => Err(ApiError::Validation(format!(
            "Unknown rate-limited service '{}'",
            raw
        ))),
        Some(service) => Ok(service),
    }
}

/// POST /rate-limits/:service/consume - Gate for AI-serving endpoints
pub async fn consume_rate_limit(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = parse_user_service(&service)?;
    let stats = gate(&state, &caller, service).await?;

    let mut headers = HeaderMap::new();
    apply_rate_limit_headers(&mut headers, &stats);
    Ok((headers, Json(stats)))
}

#[derive(Debug, Deserialize)]
pub struct SetLimitRequest {
    pub user_id: String,
    pub service: String,
    pub new_limit: u32,
}

/// PUT /admin/rate-limits - Override a user's ceiling for one service
pub async fn set_rate_limit(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<SetLimitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let service = parse_user_service(&payload.service)?;

    let updated = state
        .limiter
        .set_limit(&payload.user_id, service, payload.new_limit)
        .await?;
    info!(
        admin = %caller.user_id,
        user_id = %payload.user_id,
        %service,
        new_limit = payload.new_limit,
        "Admin updated rate limit"
    );
    Ok(Json(updated))
}

/// GET /admin/rate-limits/:user_id - Raw rate limit record
pub async fn get_rate_limit_record(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let record = state
        .limiter
        .record(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No rate limit record for user {}", user_id)))?;
    Ok(Json(record))
}

/// POST /admin/submissions/:id/requeue - Retry a submission that failed internally
pub async fn requeue_submission(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let id = parse_submission_id(&id)?;

    let mut submission = state
        .store
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {} not found", id)))?;

    if submission.status != SubmissionStatus::InternalError {
        return Err(ApiError::Validation(format!(
            "Only INTERNAL_ERROR submissions can be requeued (current: {})",
            submission.status
        )));
    }

    // PENDING must be visible before a worker can dequeue the id
    let failed = submission.clone();
    submission.reset_for_requeue(Utc::now());
    state.store.save_submission(&submission).await?;

    let rejection = match state.queue.enqueue(id) {
        Ok(EnqueueOutcome::Queued) => None,
        Ok(EnqueueOutcome::AlreadyQueued) => Some(ApiError::Conflict(format!(
            "Submission {} is still being processed",
            id
        ))),
        Err(e) => Some(e.into()),
    };
    if let Some(rejection) = rejection {
        warn!(submission_id = %id, error = %rejection, "Requeue not accepted; restoring failed state");
        state.store.save_submission(&failed).await?;
        return Err(rejection);
    }

    metrics::record_submission_enqueued(&submission.language.to_string());
    info!(admin = %caller.user_id, submission_id = %id, "Submission requeued");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateSubmissionResponse {
            submission_id: id,
            status: submission.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct GuestResponse {
    pub user_id: String,
    pub username: String,
    pub role: &'static str,
}

/// POST /guest - Issue a throwaway guest identity (IP-limited)
pub async fn create_guest() -> impl IntoResponse {
    let id = Uuid::new_v4();
    let simple = id.simple().to_string();
    let guest = GuestResponse {
        user_id: format!("guest-{}", id),
        username: format!("guest_{}", &simple[..8]),
        role: "guest",
    };
    info!(user_id = %guest.user_id, "Guest identity issued");
    (StatusCode::CREATED, Json(guest))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub queue_depth: usize,
}

/// GET /health - Liveness with queue depth
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: if state.queue.is_closed() { "draining" } else { "ok" },
        uptime_secs: state.start_time.elapsed().as_secs(),
        queue_depth: state.queue.depth(),
    })
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
