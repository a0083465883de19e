use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::errors::{RunError, ValidationError};
use common::models::{BackupJob, JobUpdate, NewBackupJob, RunRecord, TriggerSource};
use common::schedule::ScheduleExpression;

const DEFAULT_RUNS_LIMIT: i64 = 20;
const MAX_RUNS_LIMIT: i64 = 500;

/// Job with its live scheduling state
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: BackupJob,
    pub next_run_at: Option<DateTime<Utc>>,
    pub is_running: bool,
}

/// Acknowledgement for an accepted on-demand run
#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub job_id: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

/// Trim and validate job input
pub fn validate_job_request(req: NewBackupJob) -> Result<NewBackupJob, ValidationError> {
    let job = NewBackupJob {
        name: req.name.trim().to_string(),
        source_path: req.source_path.trim().to_string(),
        destination_path: req.destination_path.trim().to_string(),
        schedule: req.schedule.trim().to_string(),
        is_active: req.is_active,
    };

    for (field, value) in [
        ("name", &job.name),
        ("source_path", &job.source_path),
        ("destination_path", &job.destination_path),
    ] {
        if value.is_empty() {
            return Err(ValidationError::MissingField(field.to_string()));
        }
    }

    ScheduleExpression::parse(&job.schedule).map_err(|e| ValidationError::InvalidFieldValue {
        field: "schedule".to_string(),
        reason: e.to_string(),
    })?;

    Ok(job)
}

fn parse_body(payload: Result<Json<NewBackupJob>, JsonRejection>) -> Result<NewBackupJob, ErrorResponse> {
    payload
        .map(|Json(req)| req)
        .map_err(|e| ErrorResponse::new("validation_error", e.body_text()))
}

async fn with_schedule_state(state: &AppState, jobs: Vec<BackupJob>) -> Vec<JobResponse> {
    let triggers = state.manager.triggers().await;
    let runner = state.manager.runner();

    jobs.into_iter()
        .map(|job| {
            let next_run_at = triggers
                .iter()
                .find(|trigger| trigger.job_id == job.id)
                .and_then(|trigger| trigger.next_fire_at);
            let is_running = runner.is_running(job.id);
            JobResponse {
                job,
                next_run_at,
                is_running,
            }
        })
        .collect()
}

async fn job_response(state: &AppState, job: BackupJob) -> JobResponse {
    let next_run_at = state
        .manager
        .triggers()
        .await
        .into_iter()
        .find(|trigger| trigger.job_id == job.id)
        .and_then(|trigger| trigger.next_fire_at);
    let is_running = state.manager.runner().is_running(job.id);

    JobResponse {
        job,
        next_run_at,
        is_running,
    }
}

async fn find_job(state: &AppState, id: i64) -> Result<BackupJob, ErrorResponse> {
    state
        .repo
        .get_job_by_id(id)
        .await?
        .ok_or_else(|| ErrorResponse::new("not_found", format!("Job not found: {}", id)))
}

/// Create a new job
#[tracing::instrument(skip(state, payload))]
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<NewBackupJob>, JsonRejection>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let req = validate_job_request(parse_body(payload)?)?;

    let job = state.repo.create_job(&req).await?;
    state.reload_schedule().await;

    tracing::info!(job_id = job.id, job_name = %job.name, "Job created successfully");
    let response = job_response(&state, job).await;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(response))))
}

/// List all jobs
#[tracing::instrument(skip(state))]
pub async fn list_jobs(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<JobResponse>>>, ErrorResponse> {
    let jobs = state.repo.get_all_jobs().await?;
    let jobs = with_schedule_state(&state, jobs).await;

    tracing::debug!(count = jobs.len(), "Listed jobs");
    Ok(Json(SuccessResponse::new(jobs)))
}

/// Get job details by ID
#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<JobResponse>>, ErrorResponse> {
    let job = find_job(&state, id).await?;
    Ok(Json(SuccessResponse::new(job_response(&state, job).await)))
}

/// Replace a job's definition
#[tracing::instrument(skip(state, payload))]
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<JobUpdate>, JsonRejection>,
) -> Result<Json<SuccessResponse<JobResponse>>, ErrorResponse> {
    let req = validate_job_request(parse_body(payload)?)?;

    let job = state.repo.update_job(id, &req).await?;
    state.reload_schedule().await;

    tracing::info!(job_id = id, "Job updated successfully");
    Ok(Json(SuccessResponse::new(job_response(&state, job).await)))
}

/// Delete a job and its run history
#[tracing::instrument(skip(state))]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<()>>, ErrorResponse> {
    state.repo.delete_job(id).await?;
    state.reload_schedule().await;

    tracing::info!(job_id = id, "Job deleted successfully");
    Ok(Json(SuccessResponse::new(())))
}

/// Enable a job
#[tracing::instrument(skip(state))]
pub async fn enable_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<BackupJob>>, ErrorResponse> {
    let job = state.repo.set_job_active(id, true).await?;
    state.reload_schedule().await;

    tracing::info!(job_id = id, "Job enabled");
    Ok(Json(SuccessResponse::new(job)))
}

/// Disable a job
#[tracing::instrument(skip(state))]
pub async fn disable_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse<BackupJob>>, ErrorResponse> {
    let job = state.repo.set_job_active(id, false).await?;
    state.reload_schedule().await;

    tracing::info!(job_id = id, "Job disabled");
    Ok(Json(SuccessResponse::new(job)))
}

/// Start a backup now.
///
/// Answers `202 Accepted` right away; the outcome is written to the job's
/// status and run history when the backup finishes. Inactive jobs can be
/// run on demand too.
#[tracing::instrument(skip(state))]
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let job = find_job(&state, id).await?;

    state
        .manager
        .runner()
        .spawn(job.descriptor(), TriggerSource::Manual)
        .map_err(|e| match e {
            RunError::AlreadyRunning(_) => ErrorResponse::new("conflict", e.to_string()),
        })?;

    tracing::info!(job_id = id, job_name = %job.name, "Job manually triggered");
    Ok((
        StatusCode::ACCEPTED,
        Json(SuccessResponse::new(RunAccepted {
            job_id: id,
            message: format!("Backup for job '{}' started", job.name),
        })),
    ))
}

/// Run history of a job, newest first
#[tracing::instrument(skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<SuccessResponse<Vec<RunRecord>>>, ErrorResponse> {
    find_job(&state, id).await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUNS_LIMIT)
        .clamp(1, MAX_RUNS_LIMIT);
    let runs = state.repo.list_runs(id, limit).await?;
    Ok(Json(SuccessResponse::new(runs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, source: &str, destination: &str, schedule: &str) -> NewBackupJob {
        NewBackupJob {
            name: name.to_string(),
            source_path: source.to_string(),
            destination_path: destination.to_string(),
            schedule: schedule.to_string(),
            is_active: true,
        }
    }

    #[test]
    fn test_validation_trims_fields() {
        let job = validate_job_request(request(" docs ", " /a ", "/b ", " 0 2 * * * ")).unwrap();
        assert_eq!(job.name, "docs");
        assert_eq!(job.source_path, "/a");
        assert_eq!(job.destination_path, "/b");
        assert_eq!(job.schedule, "0 2 * * *");
    }

    #[test]
    fn test_validation_requires_fields() {
        let err = validate_job_request(request("", "/a", "/b", "manual")).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(ref f) if f == "name"));

        let err = validate_job_request(request("docs", "  ", "/b", "manual")).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(ref f) if f == "source_path"));
    }

    #[test]
    fn test_validation_rejects_bad_schedule() {
        let err = validate_job_request(request("docs", "/a", "/b", "every day")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFieldValue { ref field, .. } if field == "schedule"));
        assert!(validate_job_request(request("docs", "/a", "/b", "")).is_ok());
    }
}
