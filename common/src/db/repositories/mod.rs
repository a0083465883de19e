// Repository layer for database operations

pub mod job;
pub mod memory;

pub use job::{JobRepository, SqliteJobRepository};
pub use memory::MemoryJobRepository;

#[cfg(test)]
pub use job::MockJobRepository;
