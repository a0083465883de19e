// Schedule manager: rebuilds the trigger table from the job repository

use crate::backup::JobRunner;
use crate::db::repositories::JobRepository;
use crate::errors::DatabaseError;
use crate::models::{BackupJob, JobDescriptor, RunStatus, TriggerSource};
use crate::schedule::ScheduleExpression;
use crate::scheduler::runtime::{TriggerCallback, TriggerInfo, TriggerRuntime, TriggerRuntimeConfig};
use crate::telemetry;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one reload pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub scheduled: usize,
    pub inactive: usize,
    pub manual: usize,
    pub invalid: usize,
    pub failed: usize,
}

/// Owns the trigger runtime and keeps it in step with the stored jobs
pub struct ScheduleManager {
    repo: Arc<dyn JobRepository>,
    runner: Arc<JobRunner>,
    runtime: TriggerRuntime,
    reload_lock: Mutex<()>,
}

impl ScheduleManager {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        runner: Arc<JobRunner>,
        config: TriggerRuntimeConfig,
    ) -> Self {
        Self {
            repo,
            runner,
            runtime: TriggerRuntime::new(config),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Replace all triggers with one per active, recurring job.
    ///
    /// Safe to call repeatedly and concurrently; reloads are serialised. If
    /// the job list cannot be fetched the current triggers stay in place.
    /// Per-job problems are written back to the job and never abort the pass.
    #[instrument(skip(self))]
    pub async fn load_and_schedule_jobs(&self) -> Result<ReloadSummary, DatabaseError> {
        let _reload = self.reload_lock.lock().await;

        let jobs = self.repo.get_all_jobs().await.map_err(|e| {
            error!(error = %e, "Failed to load jobs, keeping current schedule");
            e
        })?;

        let removed = self.runtime.remove_all().await;
        debug!(removed = removed, job_count = jobs.len(), "Cleared triggers");

        let mut summary = ReloadSummary::default();
        for job in &jobs {
            self.schedule_job(job, &mut summary).await;
        }

        telemetry::update_registered_triggers(self.runtime.len().await);
        info!(
            scheduled = summary.scheduled,
            inactive = summary.inactive,
            manual = summary.manual,
            invalid = summary.invalid,
            failed = summary.failed,
            "Schedule reloaded"
        );

        Ok(summary)
    }

    async fn schedule_job(&self, job: &BackupJob, summary: &mut ReloadSummary) {
        if !job.is_active {
            debug!(job_id = job.id, job_name = %job.name, "Skipping inactive job");
            summary.inactive += 1;
            return;
        }

        let rule = match ScheduleExpression::parse(&job.schedule) {
            Ok(ScheduleExpression::Manual) => {
                debug!(job_id = job.id, job_name = %job.name, "Skipping manual job");
                summary.manual += 1;
                return;
            }
            Ok(ScheduleExpression::Recurring(rule)) => rule,
            Err(e) => {
                warn!(
                    job_id = job.id,
                    job_name = %job.name,
                    schedule = %job.schedule,
                    error = %e,
                    "Invalid schedule, job not scheduled"
                );
                summary.invalid += 1;
                self.write_back(job.id, RunStatus::InvalidSchedule, &e.to_string())
                    .await;
                return;
            }
        };

        let callback = self.callback_for(job.descriptor());
        match self.runtime.add(job.id, rule, callback).await {
            Ok(trigger_id) => {
                info!(
                    job_id = job.id,
                    job_name = %job.name,
                    schedule = %job.schedule,
                    trigger_id = %trigger_id,
                    "Job scheduled"
                );
                summary.scheduled += 1;
            }
            Err(e) => {
                error!(job_id = job.id, job_name = %job.name, error = %e, "Failed to schedule job");
                summary.failed += 1;
                self.write_back(job.id, RunStatus::Error, &format!("Scheduling error: {}", e))
                    .await;
            }
        }
    }

    fn callback_for(&self, descriptor: JobDescriptor) -> TriggerCallback {
        let runner = Arc::clone(&self.runner);
        Arc::new(move || {
            let runner = Arc::clone(&runner);
            let descriptor = descriptor.clone();
            async move {
                runner.run(descriptor, TriggerSource::Scheduled).await;
            }
            .boxed()
        })
    }

    async fn write_back(&self, job_id: i64, status: RunStatus, message: &str) {
        if let Err(e) = self
            .repo
            .update_job_status_and_last_run(job_id, status, message, Utc::now())
            .await
        {
            error!(job_id = job_id, error = %e, "Failed to write back job status");
        }
    }

    /// Begin dispatching due triggers
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stop dispatching; runs in progress finish on their own
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    /// Currently registered triggers
    pub async fn triggers(&self) -> Vec<TriggerInfo> {
        self.runtime.entries().await
    }

    /// Fire every trigger due at `now`
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        self.runtime.dispatch_due(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::SyncEngine;
    use crate::db::repositories::{MemoryJobRepository, MockJobRepository};
    use crate::models::NewBackupJob;
    use mockall::predicate::{always, eq};
    use std::time::Duration;

    fn job(id: i64, schedule: &str, is_active: bool) -> BackupJob {
        let now = Utc::now();
        BackupJob {
            id,
            name: format!("job-{}", id),
            source_path: format!("/data/{}", id),
            destination_path: format!("/backup/{}", id),
            schedule: schedule.to_string(),
            is_active,
            status: None,
            status_message: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn manager_with(repo: Arc<dyn JobRepository>) -> ScheduleManager {
        let runner = Arc::new(JobRunner::new(repo.clone(), SyncEngine::default()));
        ScheduleManager::new(repo, runner, TriggerRuntimeConfig::default())
    }

    #[tokio::test]
    async fn test_reload_isolates_bad_jobs() {
        let mut mock = MockJobRepository::new();
        mock.expect_get_all_jobs().times(1).returning(|| {
            Ok(vec![
                job(1, "0 2 * * *", true),
                job(2, "not a cron", true),
                job(3, "0 3 * * *", false),
                job(4, "manual", true),
                job(5, "", true),
                job(6, "*/10 * * * 1-5", true),
            ])
        });
        mock.expect_update_job_status_and_last_run()
            .with(eq(2), eq(RunStatus::InvalidSchedule), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let manager = manager_with(Arc::new(mock));
        let summary = manager.load_and_schedule_jobs().await.unwrap();

        assert_eq!(
            summary,
            ReloadSummary {
                scheduled: 2,
                inactive: 1,
                manual: 2,
                invalid: 1,
                failed: 0,
            }
        );
        let job_ids: Vec<i64> = manager.triggers().await.iter().map(|t| t.job_id).collect();
        assert_eq!(job_ids, vec![1, 6]);
    }

    #[tokio::test]
    async fn test_invalid_schedule_message_is_parse_error() {
        let mut mock = MockJobRepository::new();
        mock.expect_get_all_jobs()
            .returning(|| Ok(vec![job(2, "61 * * * *", true)]));
        mock.expect_update_job_status_and_last_run()
            .withf(|job_id, status, message, _| {
                *job_id == 2
                    && *status == RunStatus::InvalidSchedule
                    && message.contains("Invalid cron expression '61 * * * *'")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let manager = manager_with(Arc::new(mock));
        manager.load_and_schedule_jobs().await.unwrap();
        assert!(manager.triggers().await.is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_is_written_back() {
        let mut mock = MockJobRepository::new();
        // Two rows sharing an id make the second registration collide
        mock.expect_get_all_jobs()
            .returning(|| Ok(vec![job(1, "0 2 * * *", true), job(1, "0 4 * * *", true)]));
        mock.expect_update_job_status_and_last_run()
            .withf(|job_id, status, message, _| {
                *job_id == 1 && *status == RunStatus::Error && message.starts_with("Scheduling error:")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let manager = manager_with(Arc::new(mock));
        let summary = manager.load_and_schedule_jobs().await.unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_write_back_failure_does_not_abort_reload() {
        let mut mock = MockJobRepository::new();
        mock.expect_get_all_jobs()
            .returning(|| Ok(vec![job(1, "bogus", true), job(2, "0 2 * * *", true)]));
        mock.expect_update_job_status_and_last_run()
            .returning(|_, _, _, _| Err(DatabaseError::QueryFailed("locked".to_string())));

        let manager = manager_with(Arc::new(mock));
        let summary = manager.load_and_schedule_jobs().await.unwrap();
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.scheduled, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_existing_triggers() {
        let mut calls = 0;
        let mut mock = MockJobRepository::new();
        mock.expect_get_all_jobs().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![job(1, "0 2 * * *", true)])
            } else {
                Err(DatabaseError::ConnectionFailed("gone".to_string()))
            }
        });

        let manager = manager_with(Arc::new(mock));
        manager.load_and_schedule_jobs().await.unwrap();
        let before = manager.triggers().await;

        let err = manager.load_and_schedule_jobs().await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionFailed(_)));
        assert_eq!(manager.triggers().await, before);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let repo = Arc::new(MemoryJobRepository::new());
        for (name, schedule) in [("a", "0 1 * * *"), ("b", "0 2 * * *"), ("c", "manual")] {
            repo.create_job(&NewBackupJob {
                name: name.to_string(),
                source_path: "/src".to_string(),
                destination_path: "/dst".to_string(),
                schedule: schedule.to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        }

        let manager = manager_with(repo.clone());
        let first = manager.load_and_schedule_jobs().await.unwrap();
        let second = manager.load_and_schedule_jobs().await.unwrap();
        assert_eq!(first, second);

        let job_ids: Vec<i64> = manager.triggers().await.iter().map(|t| t.job_id).collect();
        assert_eq!(job_ids, vec![1, 2]);

        // Deactivating a job drops its trigger on the next reload
        repo.set_job_active(1, false).await.unwrap();
        manager.load_and_schedule_jobs().await.unwrap();
        let job_ids: Vec<i64> = manager.triggers().await.iter().map(|t| t.job_id).collect();
        assert_eq!(job_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_concurrent_reloads_leave_one_trigger_per_job() {
        let repo = Arc::new(MemoryJobRepository::new());
        for i in 0..5 {
            repo.create_job(&NewBackupJob {
                name: format!("job-{}", i),
                source_path: "/src".to_string(),
                destination_path: "/dst".to_string(),
                schedule: "*/5 * * * *".to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        }

        let manager = Arc::new(manager_with(repo));
        let reloads: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.load_and_schedule_jobs().await })
            })
            .collect();
        for reload in reloads {
            reload.await.unwrap().unwrap();
        }

        assert_eq!(manager.triggers().await.len(), 5);
    }

    #[tokio::test]
    async fn test_fired_trigger_runs_backup_and_writes_status() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"payload").unwrap();

        let repo = Arc::new(MemoryJobRepository::new());
        let created = repo
            .create_job(&NewBackupJob {
                name: "docs".to_string(),
                source_path: source.display().to_string(),
                destination_path: dir.path().join("dst").display().to_string(),
                schedule: "* * * * *".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        let manager = manager_with(repo.clone());
        manager.load_and_schedule_jobs().await.unwrap();
        let fired = manager
            .dispatch_due(Utc::now() + chrono::Duration::minutes(2))
            .await;
        assert_eq!(fired, 1);

        let stored = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = repo.get_job_by_id(created.id).await.unwrap().unwrap();
                if job.status.is_some() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("run did not complete");

        assert_eq!(stored.status, Some(RunStatus::Success));
        assert!(dir.path().join("dst").join("a.txt").exists());
    }

    async fn wait_for_runs(
        manager: &ScheduleManager,
        repo: &MemoryJobRepository,
        job_id: i64,
        count: usize,
    ) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while repo.list_runs(job_id, 10).await.unwrap().len() < count
                || manager.runner().is_running(job_id)
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("run did not complete");
    }

    #[tokio::test]
    async fn test_trigger_uses_job_definition_from_its_reload() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"payload").unwrap();
        let old_destination = dir.path().join("old");
        let new_destination = dir.path().join("new");

        let repo = Arc::new(MemoryJobRepository::new());
        let mut definition = NewBackupJob {
            name: "docs".to_string(),
            source_path: source.display().to_string(),
            destination_path: old_destination.display().to_string(),
            schedule: "* * * * *".to_string(),
            is_active: true,
        };
        let created = repo.create_job(&definition).await.unwrap();

        let manager = manager_with(repo.clone());
        manager.load_and_schedule_jobs().await.unwrap();

        // Edited without a reload: the registered trigger keeps the old paths
        definition.destination_path = new_destination.display().to_string();
        repo.update_job(created.id, &definition).await.unwrap();

        let due = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(manager.dispatch_due(due).await, 1);
        wait_for_runs(&manager, &repo, created.id, 1).await;
        assert!(old_destination.join("a.txt").exists());
        assert!(!new_destination.exists());

        manager.load_and_schedule_jobs().await.unwrap();
        let due = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(manager.dispatch_due(due).await, 1);
        wait_for_runs(&manager, &repo, created.id, 2).await;
        assert!(new_destination.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let manager = manager_with(Arc::new(MemoryJobRepository::new()));
        assert!(!manager.is_running());
        manager.start().await;
        assert!(manager.is_running());
        manager.stop().await;
        assert!(!manager.is_running());
    }
}
