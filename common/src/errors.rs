// Error handling framework for the sync engine, scheduler and repositories

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while mirroring a source onto a destination
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source '{0}' does not exist")]
    SourceNotFound(PathBuf),

    #[error("Failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination '{destination}' is inside source '{source_dir}'")]
    DestinationInsideSource {
        source_dir: PathBuf,
        destination: PathBuf,
    },

    #[error("Failed to walk '{path}': {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("Sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Build an I/O error that names the path it failed on
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Path the error refers to, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            SyncError::SourceNotFound(path) => Some(path),
            SyncError::Io { path, .. } | SyncError::Walk { path, .. } => Some(path),
            SyncError::DestinationInsideSource { destination, .. } => Some(destination),
            SyncError::TaskFailed(_) => None,
        }
    }
}

impl From<walkdir::Error> for SyncError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from).unwrap_or_default();
        match err.into_io_error() {
            Some(source) => SyncError::Io {
                action: "read",
                path,
                source,
            },
            None => SyncError::Walk {
                path,
                reason: "filesystem loop detected".to_string(),
            },
        }
    }
}

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Cron expression '{expression}' must have 5 fields (minute hour day-of-month month day-of-week), found {found}")]
    WrongFieldCount { expression: String, found: usize },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Failed to register trigger for job {job_id}: {reason}")]
    TriggerRegistration { job_id: i64, reason: String },
}

/// Errors for a single job run request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Job {0} is already running")]
    AlreadyRunning(i64),
}

/// Validation errors for job input
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DatabaseError::DuplicateKey(db_err.message().to_string())
                } else if db_err.is_foreign_key_violation() {
                    DatabaseError::ForeignKeyViolation(db_err.message().to_string())
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_sync_error_names_path() {
        let err = SyncError::io(
            "open",
            "/tmp/missing.txt",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/tmp/missing.txt"));
        assert_eq!(err.path(), Some(&PathBuf::from("/tmp/missing.txt")));
    }

    #[test]
    fn test_run_error_display() {
        assert_eq!(
            RunError::AlreadyRunning(7).to_string(),
            "Job 7 is already running"
        );
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DatabaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
