//! Topic client that records publishes in memory.
//!
//! Used by tests, which can make it fail on demand. The recording grows with
//! every publish; long-running dry runs use `DryRunTopicClient` instead.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{BrokerError, PublishReceipt, PublishRequest, TopicClient};

#[derive(Default)]
pub struct MemoryTopicClient {
    published: Mutex<Vec<PublishRequest>>,
    seen_dedup_ids: Mutex<HashSet<(String, String)>>,
    calls: AtomicUsize,
    /// 1-based call number that fails; 0 disables
    fail_on_call: AtomicUsize,
    fail_all: AtomicBool,
}

impl MemoryTopicClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th publish call (1-based, counted from now on).
    pub fn fail_on_call(&self, n: usize) {
        let current = self.calls.load(Ordering::SeqCst);
        self.fail_on_call.store(current + n, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Accepted publishes in call order.
    pub fn published(&self) -> Vec<PublishRequest> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicClient for MemoryTopicClient {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_all.load(Ordering::SeqCst)
            || self.fail_on_call.load(Ordering::SeqCst) == call
        {
            return Err(BrokerError::Rejected(format!("publish {} failed", call)));
        }

        if let Some(dedup) = &request.deduplication_id {
            let mut seen = self
                .seen_dedup_ids
                .lock()
                .map_err(|_| BrokerError::Rejected("dedup state poisoned".into()))?;
            if !seen.insert((request.topic.clone(), dedup.clone())) {
                return Ok(PublishReceipt { message_id: None });
            }
        }

        let mut published = self
            .published
            .lock()
            .map_err(|_| BrokerError::Rejected("publish log poisoned".into()))?;
        published.push(request);

        Ok(PublishReceipt {
            message_id: Some(format!("{}-0", published.len())),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
