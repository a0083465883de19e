// Scheduler module: trigger runtime and the schedule manager driving it

pub mod manager;
pub mod runtime;

pub use manager::{ReloadSummary, ScheduleManager};
pub use runtime::{TriggerCallback, TriggerId, TriggerInfo, TriggerRuntime, TriggerRuntimeConfig};
