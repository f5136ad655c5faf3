//! Room Manager
//!
//! Rooms are ephemeral broadcast groups: one per channel, one per city
//! scope, and one private room per user. A room exists only as the set of
//! connections currently subscribed to it; joining has no effect on durable
//! membership.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::protocol::ServerEvent;
use super::registry::ConnectionRegistry;
use crate::metrics::GatewayMetrics;

pub fn channel_room(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

pub fn city_room(city_id: &str) -> String {
    format!("city:{city_id}")
}

pub fn user_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub struct RoomManager {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<GatewayMetrics>,
    rooms: RwLock<HashMap<String, HashSet<String>>>,
}

impl RoomManager {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            registry,
            metrics,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a room's subscriber set. Idempotent.
    pub async fn join(&self, connection_id: &str, room: &str) {
        {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(room.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        self.registry.track_join(connection_id, room).await;
        debug!(conn_id = %connection_id, room = %room, "Joined room");
    }

    /// Remove a connection from a room. Idempotent, no-op if absent.
    pub async fn leave(&self, connection_id: &str, room: &str) {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get_mut(room) {
                members.remove(connection_id);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
        self.registry.track_leave(connection_id, room).await;
    }

    /// Deliver an event to every connection currently subscribed to the
    /// room, in issue order. Connections that disconnected are silently
    /// skipped and pruned from the room.
    pub async fn broadcast(&self, room: &str, event: ServerEvent) {
        let members: Vec<String> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.iter().cloned().collect(),
                None => return,
            }
        };

        let senders = self.registry.senders(&members).await;
        let mut dead: Vec<String> = members
            .iter()
            .filter(|id| !senders.iter().any(|(sid, _)| sid == *id))
            .cloned()
            .collect();

        for (connection_id, tx) in senders {
            if tx.send(event.clone()).await.is_err() {
                self.metrics.event_dropped();
                dead.push(connection_id);
            }
        }

        if !dead.is_empty() {
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get_mut(room) {
                for id in &dead {
                    members.remove(id);
                }
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
    }

    /// Evict every live connection of a user from a room (used when durable
    /// membership is revoked). Returns the number of connections evicted.
    pub async fn evict_user(&self, room: &str, user_id: &str) -> usize {
        let connections = self.registry.connections_of(user_id).await;
        let mut evicted = 0;
        for connection_id in &connections {
            let was_member = {
                let rooms = self.rooms.read().await;
                rooms
                    .get(room)
                    .is_some_and(|members| members.contains(connection_id))
            };
            if was_member {
                self.leave(connection_id, room).await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop a disconnected connection from each of its rooms. Called with
    /// the room list returned by the registry on unregister.
    pub async fn drop_connection(&self, connection_id: &str, joined_rooms: &[String]) {
        let mut rooms = self.rooms.write().await;
        for room in joined_rooms {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(connection_id);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
    }

    /// Current subscriber set of a room.
    pub async fn members(&self, room: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, RoomManager) {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomManager::new(registry.clone(), Arc::new(GatewayMetrics::new()));
        (registry, rooms)
    }

    #[test]
    fn room_names_are_namespaced() {
        assert_eq!(channel_room("c1"), "channel:c1");
        assert_eq!(city_room("haifa"), "city:haifa");
        assert_eq!(user_room("u1"), "user:u1");
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let (registry, rooms) = setup();
        let (tx, _rx) = mpsc::channel(8);
        registry.register("conn-1", tx).await;

        rooms.join("conn-1", "channel:c1").await;
        rooms.join("conn-1", "channel:c1").await;
        assert_eq!(rooms.members("channel:c1").await.len(), 1);

        // One leave removes it fully, not partially
        rooms.leave("conn-1", "channel:c1").await;
        assert!(rooms.members("channel:c1").await.is_empty());
        assert!(registry.rooms_of("conn-1").await.is_empty());
    }

    #[tokio::test]
    async fn leave_absent_is_noop() {
        let (_registry, rooms) = setup();
        rooms.leave("conn-1", "channel:never").await;
        assert!(rooms.members("channel:never").await.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_members_in_order() {
        let (registry, rooms) = setup();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        registry.register("conn-1", tx1).await;
        registry.register("conn-2", tx2).await;
        rooms.join("conn-1", "channel:c1").await;
        rooms.join("conn-2", "channel:c1").await;

        rooms
            .broadcast("channel:c1", ServerEvent::MessageDelete("m1".into()))
            .await;
        rooms
            .broadcast("channel:c1", ServerEvent::MessageDelete("m2".into()))
            .await;

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                ServerEvent::MessageDelete(id) => assert_eq!(id, "m1"),
                other => panic!("unexpected event: {:?}", other),
            }
            match rx.recv().await.unwrap() {
                ServerEvent::MessageDelete(id) => assert_eq!(id, "m2"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_skips_non_members() {
        let (registry, rooms) = setup();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        registry.register("conn-1", tx1).await;
        registry.register("conn-2", tx2).await;
        rooms.join("conn-1", "channel:c1").await;

        rooms
            .broadcast("channel:c1", ServerEvent::MessageDelete("m1".into()))
            .await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_after_disconnect_is_silent() {
        let (registry, rooms) = setup();
        let (tx, rx) = mpsc::channel(8);
        registry.register("conn-1", tx).await;
        rooms.join("conn-1", "channel:c1").await;

        // Simulate transport disconnect
        let gone = registry.unregister("conn-1").await.unwrap();
        rooms.drop_connection("conn-1", &gone.rooms).await;
        drop(rx);

        // No error, no panic, nothing delivered
        rooms
            .broadcast("channel:c1", ServerEvent::MessageDelete("m1".into()))
            .await;
        assert!(rooms.members("channel:c1").await.is_empty());
    }

    #[tokio::test]
    async fn dead_receiver_is_pruned() {
        let (registry, rooms) = setup();
        let (tx, rx) = mpsc::channel(8);
        registry.register("conn-1", tx).await;
        rooms.join("conn-1", "channel:c1").await;
        drop(rx);

        rooms
            .broadcast("channel:c1", ServerEvent::MessageDelete("m1".into()))
            .await;
        assert!(rooms.members("channel:c1").await.is_empty());
    }

    #[tokio::test]
    async fn evict_user_removes_all_their_connections() {
        let (registry, rooms) = setup();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);
        registry.register("conn-1", tx1).await;
        registry.register("conn-2", tx2).await;
        registry.register("conn-3", tx3).await;
        registry.bind_user("conn-1", "user-a").await;
        registry.bind_user("conn-2", "user-a").await;
        registry.bind_user("conn-3", "user-b").await;
        rooms.join("conn-1", "channel:c1").await;
        rooms.join("conn-2", "channel:c1").await;
        rooms.join("conn-3", "channel:c1").await;

        let evicted = rooms.evict_user("channel:c1", "user-a").await;
        assert_eq!(evicted, 2);

        let members = rooms.members("channel:c1").await;
        assert_eq!(members, vec!["conn-3".to_string()]);
    }
}
