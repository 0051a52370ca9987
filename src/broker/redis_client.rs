//! Redis Streams topic client.
//!
//! Each topic is a stream; every publish is one `XADD` entry with fields
//! `payload`, `attr:<name>`, `group` and `dedup_id`. FIFO deduplication is an
//! expiring marker key checked in the same Lua script as the `XADD`. The
//! marker is only written after the entry is appended, so a failed `XADD`
//! leaves the publish retryable.

use std::sync::Arc;

use async_trait::async_trait;
use redis::Script;

use super::client::{BrokerError, PublishReceipt, PublishRequest, TopicClient};
use crate::config::BrokerConfig;
use crate::redis::RedisPool;

const PUBLISH_SCRIPT: &str = r#"
if KEYS[2] and redis.call('EXISTS', KEYS[2]) == 1 then
  return ''
end
local args = {'XADD', KEYS[1], 'MAXLEN', '~', ARGV[1], '*'}
for i = 3, #ARGV do
  args[#args + 1] = ARGV[i]
end
local id = redis.call(unpack(args))
if KEYS[2] then
  redis.call('SET', KEYS[2], '1', 'EX', ARGV[2])
end
return id
"#;

pub struct RedisTopicClient {
    pool: Arc<RedisPool>,
    script: Script,
    stream_max_len: usize,
    dedup_window_seconds: u64,
}

impl RedisTopicClient {
    pub fn new(pool: Arc<RedisPool>, config: &BrokerConfig) -> Self {
        Self {
            pool,
            script: Script::new(PUBLISH_SCRIPT),
            stream_max_len: config.stream_max_len,
            dedup_window_seconds: config.dedup_window_seconds,
        }
    }

    fn dedup_key(topic: &str, deduplication_id: &str) -> String {
        format!("{}:dedup:{}", topic, deduplication_id)
    }
}

/// Flatten a request into stream field/value pairs.
fn stream_fields(request: &PublishRequest) -> Vec<(String, String)> {
    let mut fields = Vec::with_capacity(request.attributes.len() + 3);
    fields.push(("payload".to_string(), request.message.clone()));
    for (name, value) in &request.attributes {
        fields.push((format!("attr:{}", name), value.clone()));
    }
    if let Some(group) = &request.message_group_id {
        fields.push(("group".to_string(), group.clone()));
    }
    if let Some(dedup) = &request.deduplication_id {
        fields.push(("dedup_id".to_string(), dedup.clone()));
    }
    fields
}

#[async_trait]
impl TopicClient for RedisTopicClient {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, BrokerError> {
        let mut invocation = self.script.prepare_invoke();
        invocation.key(&request.topic);
        if let Some(dedup) = &request.deduplication_id {
            invocation.key(Self::dedup_key(&request.topic, dedup));
        }
        invocation
            .arg(self.stream_max_len)
            .arg(self.dedup_window_seconds);
        for (field, value) in stream_fields(&request) {
            invocation.arg(field).arg(value);
        }

        let id: String = self
            .pool
            .execute(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;

        if id.is_empty() {
            tracing::debug!(
                topic = %request.topic,
                deduplication_id = ?request.deduplication_id,
                "Duplicate publish dropped"
            );
            return Ok(PublishReceipt { message_id: None });
        }

        Ok(PublishReceipt {
            message_id: Some(id),
        })
    }

    fn name(&self) -> &'static str {
        "redis-streams"
    }
}
