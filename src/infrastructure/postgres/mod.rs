//! PostgreSQL persistence module.
//!
//! Provides connection pooling and schema migrations for the outbox table.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
