// In-memory job repository used by tests and throwaway deployments

use crate::db::repositories::job::JobRepository;
use crate::errors::DatabaseError;
use crate::models::{BackupJob, JobUpdate, NewBackupJob, RunRecord, RunResult, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    jobs: BTreeMap<i64, BackupJob>,
    runs: Vec<RunRecord>,
    next_job_id: i64,
    next_run_id: i64,
}

impl Tables {
    fn name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.jobs
            .values()
            .any(|job| job.name == name && Some(job.id) != except)
    }

    fn job_mut(&mut self, id: i64) -> Result<&mut BackupJob, DatabaseError> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound(format!("Job not found: {}", id)))
    }
}

/// Repository keeping jobs and runs in process memory
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    tables: RwLock<Tables>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn get_all_jobs(&self) -> Result<Vec<BackupJob>, DatabaseError> {
        Ok(self.tables.read().await.jobs.values().cloned().collect())
    }

    async fn get_job_by_id(&self, id: i64) -> Result<Option<BackupJob>, DatabaseError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn get_job_by_name(&self, name: &str) -> Result<Option<BackupJob>, DatabaseError> {
        Ok(self
            .tables
            .read()
            .await
            .jobs
            .values()
            .find(|job| job.name == name)
            .cloned())
    }

    async fn create_job(&self, job: &NewBackupJob) -> Result<BackupJob, DatabaseError> {
        let mut tables = self.tables.write().await;
        if tables.name_taken(&job.name, None) {
            return Err(DatabaseError::DuplicateKey(format!(
                "Job name already exists: {}",
                job.name
            )));
        }

        tables.next_job_id += 1;
        let now = Utc::now();
        let created = BackupJob {
            id: tables.next_job_id,
            name: job.name.clone(),
            source_path: job.source_path.clone(),
            destination_path: job.destination_path.clone(),
            schedule: job.schedule.trim().to_string(),
            is_active: job.is_active,
            status: None,
            status_message: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_job(&self, id: i64, update: &JobUpdate) -> Result<BackupJob, DatabaseError> {
        let mut tables = self.tables.write().await;
        if tables.name_taken(&update.name, Some(id)) {
            return Err(DatabaseError::DuplicateKey(format!(
                "Job name already exists: {}",
                update.name
            )));
        }

        let job = tables.job_mut(id)?;
        job.name = update.name.clone();
        job.source_path = update.source_path.clone();
        job.destination_path = update.destination_path.clone();
        job.schedule = update.schedule.trim().to_string();
        job.is_active = update.is_active;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn set_job_active(&self, id: i64, active: bool) -> Result<BackupJob, DatabaseError> {
        let mut tables = self.tables.write().await;
        let job = tables.job_mut(id)?;
        job.is_active = active;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete_job(&self, id: i64) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if tables.jobs.remove(&id).is_none() {
            return Err(DatabaseError::NotFound(format!("Job not found: {}", id)));
        }
        tables.runs.retain(|run| run.job_id != id);
        Ok(())
    }

    async fn update_job_status_and_last_run(
        &self,
        job_id: i64,
        status: RunStatus,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let job = tables.job_mut(job_id)?;
        job.status = Some(status);
        job.status_message = Some(message.to_string());
        job.last_run_at = Some(at);
        Ok(())
    }

    async fn record_run(&self, result: &RunResult) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(&result.job_id) {
            return Err(DatabaseError::ForeignKeyViolation(format!(
                "Job not found: {}",
                result.job_id
            )));
        }

        tables.next_run_id += 1;
        let record = RunRecord {
            id: tables.next_run_id,
            job_id: result.job_id,
            status: result.status,
            message: result.message.clone(),
            started_at: result.started_at,
            finished_at: result.finished_at(),
            files_copied: i64::try_from(result.files_copied).unwrap_or(i64::MAX),
            bytes_copied: i64::try_from(result.bytes_copied).unwrap_or(i64::MAX),
        };
        let id = record.id;
        tables.runs.push(record);
        Ok(id)
    }

    async fn list_runs(&self, job_id: i64, limit: i64) -> Result<Vec<RunRecord>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut runs: Vec<RunRecord> = tables
            .runs
            .iter()
            .filter(|run| run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }
}
