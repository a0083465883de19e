use axum::{extract::State, Json};
use serde::Serialize;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::scheduler::{ReloadSummary, TriggerInfo};

/// Current scheduler state
#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub timezone: String,
    pub triggers: Vec<TriggerInfo>,
    pub running_jobs: Vec<i64>,
}

/// Rebuild all triggers from the stored jobs
#[tracing::instrument(skip(state))]
pub async fn reload(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<ReloadSummary>>, ErrorResponse> {
    let summary = state.manager.load_and_schedule_jobs().await?;
    Ok(Json(SuccessResponse::new(summary)))
}

/// List registered triggers with their next fire times
#[tracing::instrument(skip(state))]
pub async fn list_triggers(State(state): State<AppState>) -> Json<SuccessResponse<SchedulerStatus>> {
    Json(SuccessResponse::new(SchedulerStatus {
        running: state.manager.is_running(),
        timezone: state.config.scheduler.timezone.clone(),
        triggers: state.manager.triggers().await,
        running_jobs: state.manager.runner().running_jobs(),
    }))
}
