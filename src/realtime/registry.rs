//! Registry of live hub connections and the groups they belong to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::message::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub recipient: Uuid,
    pub group: String,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds)
    last_activity: AtomicI64,
    closed: Notify,
}

impl ConnectionHandle {
    fn new(recipient: Uuid, group: String, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient,
            group,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            closed: Notify::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

/// Connections indexed by id and by group
pub struct GroupRegistry {
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// group name -> connection ids
    group_index: DashMap<String, HashSet<Uuid>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            group_index: DashMap::new(),
        }
    }

    /// Register a connection and add it to `group`
    pub fn join(
        &self,
        recipient: Uuid,
        group: String,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(recipient, group, sender));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());
        self.group_index
            .entry(handle.group.clone())
            .or_default()
            .insert(conn_id);

        tracing::debug!(connection_id = %conn_id, group = %handle.group, "Connection joined group");

        handle
    }

    /// Remove a connection from the registry and its group
    pub fn leave(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;

        if let Some(mut members) = self.group_index.get_mut(&handle.group) {
            members.remove(&connection_id);
            if members.is_empty() {
                drop(members);
                self.group_index
                    .remove_if(&handle.group, |_, members| members.is_empty());
            }
        }

        tracing::debug!(connection_id = %connection_id, group = %handle.group, "Connection left group");

        Some(handle)
    }

    /// Current members of a group
    pub fn group_connections(&self, group: &str) -> Vec<Arc<ConnectionHandle>> {
        self.group_index
            .get(group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            groups: self.group_index.len(),
        }
    }

    /// Drop connections idle for longer than `timeout_secs` and signal them to close.
    pub fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect();

        for conn_id in &stale {
            if let Some(handle) = self.leave(*conn_id) {
                tracing::info!(connection_id = %conn_id, "Closing stale connection due to timeout");
                handle.close();
            }
        }

        stale.len()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub groups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let registry = GroupRegistry::new();
        let recipient = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);

        let first = registry.join(recipient, "user-a".to_string(), tx.clone());
        let second = registry.join(recipient, "user-a".to_string(), tx);
        assert_eq!(registry.group_connections("user-a").len(), 2);
        assert_eq!(registry.stats().groups, 1);

        registry.leave(first.id);
        assert_eq!(registry.group_connections("user-a").len(), 1);

        registry.leave(second.id);
        assert!(registry.group_connections("user-a").is_empty());
        assert_eq!(registry.stats().groups, 0);
        assert!(registry.leave(second.id).is_none());
    }

    #[tokio::test]
    async fn test_stale_connections_closed() {
        let registry = GroupRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let handle = registry.join(Uuid::new_v4(), "user-b".to_string(), tx);
        handle
            .last_activity
            .store(Utc::now().timestamp() - 600, Ordering::Relaxed);

        assert_eq!(registry.cleanup_stale_connections(120), 1);
        assert_eq!(registry.connection_count(), 0);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle.closed())
            .await
            .expect("close should be signalled");
    }
}
