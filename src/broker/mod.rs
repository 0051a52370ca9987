//! Broker channel: publishes outbox events to a push-notification topic.

mod client;
mod dry_run_client;
mod memory_client;
mod publisher;
mod redis_client;

pub use client::{BrokerError, PublishReceipt, PublishRequest, TopicClient};
pub use dry_run_client::DryRunTopicClient;
pub use memory_client::MemoryTopicClient;
pub use publisher::{deduplication_id, message_group_id, BrokerPublisher};
pub use redis_client::RedisTopicClient;
