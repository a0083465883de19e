// Backup execution: change-aware sync engine and the per-job runner

pub mod engine;
pub mod in_flight;
pub mod runner;

pub use engine::{directory_size, sync_file, CopyPolicy, FileOutcome, SyncEngine, SyncFailure, SyncReport};
pub use in_flight::{InFlightGuard, InFlightJobs};
pub use runner::{perform_backup, JobRunner};
