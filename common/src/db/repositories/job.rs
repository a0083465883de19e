// Job repository: persistence boundary for backup jobs and their run history

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{BackupJob, NewBackupJob, JobUpdate, RunRecord, RunResult, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::instrument;

/// Storage operations used by the scheduler, the job runner and the HTTP layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// All jobs ordered by id
    async fn get_all_jobs(&self) -> Result<Vec<BackupJob>, DatabaseError>;

    async fn get_job_by_id(&self, id: i64) -> Result<Option<BackupJob>, DatabaseError>;

    async fn get_job_by_name(&self, name: &str) -> Result<Option<BackupJob>, DatabaseError>;

    /// Insert a job; a taken name yields `DatabaseError::DuplicateKey`
    async fn create_job(&self, job: &NewBackupJob) -> Result<BackupJob, DatabaseError>;

    /// Replace the editable fields of an existing job
    async fn update_job(&self, id: i64, update: &JobUpdate) -> Result<BackupJob, DatabaseError>;

    async fn set_job_active(&self, id: i64, active: bool) -> Result<BackupJob, DatabaseError>;

    /// Delete a job together with its run history
    async fn delete_job(&self, id: i64) -> Result<(), DatabaseError>;

    /// Write back the outcome of the latest run or schedule validation
    async fn update_job_status_and_last_run(
        &self,
        job_id: i64,
        status: RunStatus,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Append a history row, returning its id
    async fn record_run(&self, result: &RunResult) -> Result<i64, DatabaseError>;

    /// Most recent runs of a job, newest first
    async fn list_runs(&self, job_id: i64, limit: i64) -> Result<Vec<RunRecord>, DatabaseError>;
}

const JOB_COLUMNS: &str = r#"
    id, name, source_path, destination_path, schedule, is_active,
    status, status_message, last_run_at, created_at, updated_at
"#;

/// SQLite-backed repository
#[derive(Debug, Clone)]
pub struct SqliteJobRepository {
    pool: DbPool,
}

impl SqliteJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_existing(&self, id: i64) -> Result<BackupJob, DatabaseError> {
        self.get_job_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Job not found: {}", id)))
    }
}

fn parse_status(raw: Option<String>) -> Result<Option<RunStatus>, DatabaseError> {
    raw.map(|s| RunStatus::from_str(&s))
        .transpose()
        .map_err(DatabaseError::QueryFailed)
}

fn job_from_row(row: &SqliteRow) -> Result<BackupJob, DatabaseError> {
    Ok(BackupJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_path: row.try_get("source_path")?,
        destination_path: row.try_get("destination_path")?,
        schedule: row.try_get("schedule")?,
        is_active: row.try_get("is_active")?,
        status: parse_status(row.try_get("status")?)?,
        status_message: row.try_get("status_message")?,
        last_run_at: row.try_get("last_run_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(RunRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: RunStatus::from_str(&status).map_err(DatabaseError::QueryFailed)?,
        message: row.try_get("message")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        files_copied: row.try_get("files_copied")?,
        bytes_copied: row.try_get("bytes_copied")?,
    })
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self))]
    async fn get_all_jobs(&self) -> Result<Vec<BackupJob>, DatabaseError> {
        let rows = sqlx::query(&format!("SELECT {} FROM backup_jobs ORDER BY id", JOB_COLUMNS))
            .fetch_all(self.pool.pool())
            .await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = jobs.len(), "Loaded backup jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn get_job_by_id(&self, id: i64) -> Result<Option<BackupJob>, DatabaseError> {
        let row = sqlx::query(&format!("SELECT {} FROM backup_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_job_by_name(&self, name: &str) -> Result<Option<BackupJob>, DatabaseError> {
        let row = sqlx::query(&format!("SELECT {} FROM backup_jobs WHERE name = ?", JOB_COLUMNS))
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, job), fields(job_name = %job.name))]
    async fn create_job(&self, job: &NewBackupJob) -> Result<BackupJob, DatabaseError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO backup_jobs (
                name, source_path, destination_path, schedule, is_active,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.name)
        .bind(&job.source_path)
        .bind(&job.destination_path)
        .bind(job.schedule.trim())
        .bind(job.is_active)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(job_id = id, "Job created");
        self.fetch_existing(id).await
    }

    #[instrument(skip(self, update))]
    async fn update_job(&self, id: i64, update: &JobUpdate) -> Result<BackupJob, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE backup_jobs
            SET name = ?,
                source_path = ?,
                destination_path = ?,
                schedule = ?,
                is_active = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(&update.source_path)
        .bind(&update.destination_path)
        .bind(update.schedule.trim())
        .bind(update.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Job not found: {}", id)));
        }

        tracing::info!(job_id = id, "Job updated");
        self.fetch_existing(id).await
    }

    #[instrument(skip(self))]
    async fn set_job_active(&self, id: i64, active: bool) -> Result<BackupJob, DatabaseError> {
        let result = sqlx::query("UPDATE backup_jobs SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Job not found: {}", id)));
        }

        tracing::info!(job_id = id, active = active, "Job activation changed");
        self.fetch_existing(id).await
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM backup_jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Job not found: {}", id)));
        }

        tracing::info!(job_id = id, "Job deleted");
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn update_job_status_and_last_run(
        &self,
        job_id: i64,
        status: RunStatus,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE backup_jobs
            SET status = ?, status_message = ?, last_run_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(at)
        .bind(job_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Job not found: {}", job_id)));
        }

        Ok(())
    }

    #[instrument(skip(self, result), fields(job_id = result.job_id, status = %result.status))]
    async fn record_run(&self, result: &RunResult) -> Result<i64, DatabaseError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO backup_runs (
                job_id, started_at, finished_at, status, message,
                files_copied, bytes_copied
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.job_id)
        .bind(result.started_at)
        .bind(result.finished_at())
        .bind(result.status.as_str())
        .bind(&result.message)
        .bind(i64::try_from(result.files_copied).unwrap_or(i64::MAX))
        .bind(i64::try_from(result.bytes_copied).unwrap_or(i64::MAX))
        .execute(self.pool.pool())
        .await?;

        Ok(inserted.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn list_runs(&self, job_id: i64, limit: i64) -> Result<Vec<RunRecord>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, started_at, finished_at, status, message,
                   files_copied, bytes_copied
            FROM backup_runs
            WHERE job_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(run_from_row).collect()
    }
}
