// Common library shared by the backup server and its tests

pub mod backup;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
