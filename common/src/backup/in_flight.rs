// Per-job in-flight marker preventing overlapping runs of the same job

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of job ids that currently have a run in progress
#[derive(Debug, Clone, Default)]
pub struct InFlightJobs {
    running: Arc<Mutex<HashSet<i64>>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `job_id` as running.
    ///
    /// Returns `None` if the job already has a run in progress. The marker is
    /// cleared when the returned guard is dropped.
    pub fn try_acquire(&self, job_id: i64) -> Option<InFlightGuard> {
        if !lock(&self.running).insert(job_id) {
            return None;
        }
        Some(InFlightGuard {
            job_id,
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        lock(&self.running).contains(&job_id)
    }

    /// Ids of all running jobs, sorted
    pub fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock(&self.running).iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Clears the in-flight marker for one job when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    job_id: i64,
    running: Arc<Mutex<HashSet<i64>>>,
}

impl InFlightGuard {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.job_id);
    }
}

// The set stays consistent even if a holder panicked mid-update
fn lock(set: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
