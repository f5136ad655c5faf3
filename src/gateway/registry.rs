//! Connection Registry
//!
//! The only mutable shared state in the gateway: live connections, the user
//! each is bound to, and the rooms each has joined. Indexed both ways —
//! connection id → user id and user id → connection set — so lookups are
//! O(1) in either direction and a user may hold several simultaneous
//! connections (multi-device).

use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::protocol::ServerEvent;

struct Connection {
    /// None until the handshake (or a later `authenticate`) binds a user.
    user_id: Option<String>,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, Connection>,
    /// user id → connection ids. Additive: a second device never displaces
    /// the first.
    users: HashMap<String, HashSet<String>>,
}

/// Snapshot handed back on unregister so the caller can clean up rooms.
#[derive(Debug)]
pub struct DisconnectedConnection {
    pub user_id: Option<String>,
    pub rooms: Vec<String>,
}

pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a freshly opened connection, not yet bound to any user.
    pub async fn register(&self, connection_id: &str, tx: mpsc::Sender<ServerEvent>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id.to_string(),
            Connection {
                user_id: None,
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Bind a connection to a verified user id. Returns false if the
    /// connection is unknown (already disconnected).
    pub async fn bind_user(&self, connection_id: &str, user_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.get_mut(connection_id) else {
            return false;
        };
        let previous = conn.user_id.replace(user_id.to_string());
        if let Some(prev) = previous {
            if prev != user_id {
                if let Some(set) = inner.users.get_mut(&prev) {
                    set.remove(connection_id);
                    if set.is_empty() {
                        inner.users.remove(&prev);
                    }
                }
            }
        }
        inner
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        true
    }

    /// Remove a connection entirely. Returns its bound user and joined rooms
    /// so the room manager can drop the subscriptions.
    pub async fn unregister(&self, connection_id: &str) -> Option<DisconnectedConnection> {
        let mut inner = self.inner.write().await;
        let conn = inner.connections.remove(connection_id)?;
        if let Some(user_id) = &conn.user_id {
            if let Some(set) = inner.users.get_mut(user_id) {
                set.remove(connection_id);
                if set.is_empty() {
                    inner.users.remove(user_id);
                }
            }
        }
        Some(DisconnectedConnection {
            user_id: conn.user_id,
            rooms: conn.rooms.into_iter().collect(),
        })
    }

    pub async fn user_of(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(connection_id)
            .and_then(|c| c.user_id.clone())
    }

    pub async fn track_join(&self, connection_id: &str, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(connection_id) {
            conn.rooms.insert(room.to_string());
        }
    }

    pub async fn track_leave(&self, connection_id: &str, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(connection_id) {
            conn.rooms.remove(room);
        }
    }

    pub async fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(connection_id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All live connection ids for a user (may be empty).
    pub async fn connections_of(&self, user_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.users.contains_key(user_id)
    }

    /// Presence lookup for a batch of user ids.
    pub async fn online_status(&self, user_ids: &[String]) -> HashMap<String, bool> {
        let inner = self.inner.read().await;
        user_ids
            .iter()
            .map(|id| (id.clone(), inner.users.contains_key(id)))
            .collect()
    }

    /// Send one event to one connection. Returns false when the connection
    /// is gone or its channel is closed — callers treat that silently.
    pub async fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        let tx = {
            let inner = self.inner.read().await;
            match inner.connections.get(connection_id) {
                Some(conn) => conn.tx.clone(),
                None => return false,
            }
        };
        if tx.send(event).await.is_err() {
            debug!(conn_id = %connection_id, "Dropping event for closed connection");
            return false;
        }
        true
    }

    /// Clone the senders for a set of connections in one pass. Missing
    /// connections are skipped.
    pub async fn senders(&self, connection_ids: &[String]) -> Vec<(String, mpsc::Sender<ServerEvent>)> {
        let inner = self.inner.read().await;
        connection_ids
            .iter()
            .filter_map(|id| {
                inner
                    .connections
                    .get(id)
                    .map(|c| (id.clone(), c.tx.clone()))
            })
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
