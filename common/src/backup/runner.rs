// Job runner: executes one backup for a job and persists the outcome

use crate::backup::engine::SyncEngine;
use crate::backup::in_flight::{InFlightGuard, InFlightJobs};
use crate::db::repositories::JobRepository;
use crate::errors::{RunError, SyncError};
use crate::models::{JobDescriptor, RunResult, RunStatus, TriggerSource};
use crate::telemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Run the sync engine for one job and map the outcome to a [`RunResult`].
///
/// Blocking; callers on the async runtime go through [`JobRunner`].
pub fn perform_backup(job: &JobDescriptor, engine: &SyncEngine) -> RunResult {
    let started_at = Utc::now();
    let timer = Instant::now();

    let mut result = RunResult {
        job_id: job.id,
        status: RunStatus::Success,
        message: String::new(),
        started_at,
        duration: Default::default(),
        files_copied: 0,
        bytes_copied: 0,
        files_skipped: 0,
    };

    match engine.sync(&job.source_path, &job.destination_path) {
        Ok(report) => {
            result.files_copied = report.files_copied;
            result.bytes_copied = report.bytes_copied;
            result.files_skipped = report.files_skipped;

            if let Some(first) = report.failures.first() {
                result.status = RunStatus::Error;
                result.message = format!(
                    "Backup completed with {} error(s). {} file(s) copied. First error: {}",
                    report.failures.len(),
                    report.files_copied,
                    first.error
                );
            } else {
                result.message = format!(
                    "Backup successfully completed. {} file(s) copied ({} bytes), {} unchanged.",
                    report.files_copied, report.bytes_copied, report.files_skipped
                );
            }
        }
        Err(err @ SyncError::SourceNotFound(_)) => {
            result.status = RunStatus::Error;
            result.message = err.to_string();
        }
        Err(err) => {
            result.status = RunStatus::Error;
            result.message = format!("Error during backup: {}", err);
        }
    }

    result.duration = timer.elapsed();
    result
}

/// Executes backups for jobs, one run per job at a time
pub struct JobRunner {
    repo: Arc<dyn JobRepository>,
    engine: Arc<SyncEngine>,
    in_flight: InFlightJobs,
}

impl JobRunner {
    pub fn new(repo: Arc<dyn JobRepository>, engine: SyncEngine) -> Self {
        Self {
            repo,
            engine: Arc::new(engine),
            in_flight: InFlightJobs::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.in_flight.is_running(job_id)
    }

    /// Ids of jobs with a run in progress
    pub fn running_jobs(&self) -> Vec<i64> {
        self.in_flight.running()
    }

    /// Run a backup to completion on the current task.
    ///
    /// Returns `None` without touching the filesystem when the job already
    /// has a run in progress.
    pub async fn run(&self, descriptor: JobDescriptor, source: TriggerSource) -> Option<RunResult> {
        let Some(guard) = self.in_flight.try_acquire(descriptor.id) else {
            warn!(
                job_id = descriptor.id,
                job_name = %descriptor.name,
                trigger = %source,
                "Job is already running, skipping this run"
            );
            telemetry::record_skipped_run(descriptor.id);
            return None;
        };

        Some(self.execute(descriptor, source, guard).await)
    }

    /// Start a backup in the background.
    ///
    /// The in-flight marker is taken before returning so callers learn
    /// synchronously whether the run was accepted.
    pub fn spawn(
        self: &Arc<Self>,
        descriptor: JobDescriptor,
        source: TriggerSource,
    ) -> Result<JoinHandle<RunResult>, RunError> {
        let guard = self
            .in_flight
            .try_acquire(descriptor.id)
            .ok_or(RunError::AlreadyRunning(descriptor.id))?;

        let runner = Arc::clone(self);
        Ok(tokio::spawn(async move {
            runner.execute(descriptor, source, guard).await
        }))
    }

    #[instrument(skip_all, fields(job_id = descriptor.id, job_name = %descriptor.name, trigger = %source))]
    async fn execute(
        &self,
        descriptor: JobDescriptor,
        source: TriggerSource,
        _guard: InFlightGuard,
    ) -> RunResult {
        info!(
            source_path = %descriptor.source_path.display(),
            destination_path = %descriptor.destination_path.display(),
            "Backup started"
        );

        let engine = Arc::clone(&self.engine);
        let job = descriptor.clone();
        let result = match tokio::task::spawn_blocking(move || perform_backup(&job, &engine)).await
        {
            Ok(result) => result,
            Err(e) => RunResult::without_copy(
                descriptor.id,
                RunStatus::Error,
                format!("Error during backup: {}", SyncError::TaskFailed(e.to_string())),
            ),
        };

        telemetry::record_backup_run(
            descriptor.id,
            &descriptor.name,
            result.duration.as_secs_f64(),
            result.files_copied,
            result.bytes_copied,
        );
        if result.is_success() {
            telemetry::record_backup_success(descriptor.id, &descriptor.name);
            info!(
                files_copied = result.files_copied,
                bytes_copied = result.bytes_copied,
                files_skipped = result.files_skipped,
                duration_ms = result.duration.as_millis() as u64,
                "Backup completed"
            );
        } else {
            telemetry::record_backup_failure(descriptor.id, &descriptor.name);
            error!(message = %result.message, "Backup failed");
        }

        if let Err(e) = self
            .repo
            .update_job_status_and_last_run(
                descriptor.id,
                result.status,
                &result.message,
                result.started_at,
            )
            .await
        {
            error!(error = %e, "Failed to write back job status");
        }

        if let Err(e) = self.repo.record_run(&result).await {
            warn!(error = %e, "Failed to record run history");
        }

        result
    }
}
