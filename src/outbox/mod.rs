//! Durable queue of pending notification events.
//!
//! A dispatch loop claims a batch of eligible rows, records an outcome for
//! each one and commits. Rows held by an open claim are invisible to every
//! other claim until that claim commits or is dropped.

mod memory;
mod postgres;
mod record;
mod store;

pub use memory::MemoryOutboxStore;
pub use postgres::{enqueue, PostgresOutboxStore};
pub use record::{FailureUpdate, OutboxEventRecord};
pub use store::{ClaimedBatch, OutboxStore, StoreError};
