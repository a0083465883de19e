// Database layer module: SQLite pool and repositories

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
