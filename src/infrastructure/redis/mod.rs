//! Redis connectivity shared by the broker topic client and the group backplane.
//!
//! - `RedisPool`: lazily established multiplexed connection for commands
//! - `ExponentialBackoff`: reconnect delays for long-lived subscriptions

mod backoff;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use pool::{PoolError, RedisPool};
