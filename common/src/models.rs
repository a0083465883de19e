use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Job Models
// ============================================================================

/// BackupJob is a named, persisted backup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: i64,
    pub name: String,
    pub source_path: String,
    pub destination_path: String,
    /// Five-field cron expression, or `manual`/empty for on-demand only jobs
    pub schedule: String,
    pub is_active: bool,
    pub status: Option<RunStatus>,
    pub status_message: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupJob {
    /// Snapshot of the fields a sync run needs
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            id: self.id,
            name: self.name.clone(),
            source_path: PathBuf::from(&self.source_path),
            destination_path: PathBuf::from(&self.destination_path),
        }
    }
}

/// Input for creating a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBackupJob {
    pub name: String,
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Full replacement of a job's editable fields
pub type JobUpdate = NewBackupJob;

/// Immutable per-job value captured by triggers and on-demand runs.
///
/// Built fresh for every registration so a run always uses the job
/// definition from the reload that scheduled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: i64,
    pub name: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

// ============================================================================
// Run Models
// ============================================================================

/// Outcome status of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Error,
    InvalidSchedule,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::Error => "Error",
            RunStatus::InvalidSchedule => "InvalidSchedule",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Success" => Ok(RunStatus::Success),
            "Error" => Ok(RunStatus::Error),
            "InvalidSchedule" => Ok(RunStatus::InvalidSchedule),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        Self::from_str(&s)
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Scheduled => write!(f, "scheduled"),
            TriggerSource::Manual => write!(f, "manual"),
        }
    }
}

/// Result of one sync run or schedule validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub job_id: i64,
    pub status: RunStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_skipped: u64,
}

impl RunResult {
    /// A result that never touched the filesystem
    pub fn without_copy(job_id: i64, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            message: message.into(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            files_copied: 0,
            bytes_copied: 0,
            files_skipped: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.started_at
            + chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// Persisted history row for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub job_id: i64,
    pub status: RunStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_copied: i64,
    pub bytes_copied: i64,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_string_conversion() {
        for status in [
            RunStatus::Success,
            RunStatus::Error,
            RunStatus::InvalidSchedule,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(RunStatus::from_str("Pending").is_err());
    }

    #[test]
    fn test_descriptor_copies_paths() {
        let now = Utc::now();
        let job = BackupJob {
            id: 3,
            name: "docs".to_string(),
            source_path: "/data/docs".to_string(),
            destination_path: "/backup/docs".to_string(),
            schedule: "0 2 * * *".to_string(),
            is_active: true,
            status: None,
            status_message: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };

        let descriptor = job.descriptor();
        assert_eq!(descriptor.id, 3);
        assert_eq!(descriptor.source_path, PathBuf::from("/data/docs"));
        assert_eq!(descriptor.destination_path, PathBuf::from("/backup/docs"));
    }

    #[test]
    fn test_new_job_defaults_to_active_manual() {
        let job: NewBackupJob = serde_json::from_value(serde_json::json!({
            "name": "photos",
            "source_path": "/a",
            "destination_path": "/b"
        }))
        .unwrap();
        assert!(job.is_active);
        assert!(job.schedule.is_empty());
    }

    #[test]
    fn test_run_result_serializes_duration_in_millis() {
        let mut result = RunResult::without_copy(1, RunStatus::Success, "ok");
        result.duration = Duration::from_millis(1500);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["duration"], 1500);
        assert_eq!(value["status"], "Success");
    }
}
