//! Presence / Broadcast API
//!
//! One-way notifications invoked by REST handlers after they mutate durable
//! state, so live clients stay in sync without polling. Fire-and-forget: no
//! acknowledgement, no retry for momentarily disconnected recipients.

use std::collections::HashMap;

use super::Gateway;
use super::protocol::ServerEvent;
use super::rooms::{channel_room, city_room};
use crate::models::PublicProfile;

impl Gateway {
    pub async fn message_updated(
        &self,
        channel_id: &str,
        message_id: &str,
        update: serde_json::Value,
    ) {
        self.rooms
            .broadcast(
                &channel_room(channel_id),
                ServerEvent::MessageUpdate {
                    message_id: message_id.to_string(),
                    update,
                },
            )
            .await;
    }

    pub async fn message_deleted(&self, channel_id: &str, message_id: &str) {
        self.rooms
            .broadcast(
                &channel_room(channel_id),
                ServerEvent::MessageDelete(message_id.to_string()),
            )
            .await;
    }

    pub async fn channel_updated(&self, channel_id: &str, update: serde_json::Value) {
        self.rooms
            .broadcast(&channel_room(channel_id), ServerEvent::ChannelUpdate(update))
            .await;
    }

    pub async fn member_joined(&self, channel_id: &str, member: PublicProfile) {
        self.rooms
            .broadcast(&channel_room(channel_id), ServerEvent::MemberJoin(member))
            .await;
    }

    /// Announce a removal and evict the removed user's live connections from
    /// the channel room. Membership is otherwise only enforced at send time,
    /// so without this the revoked user would keep receiving broadcasts
    /// until disconnect.
    pub async fn member_left(&self, channel_id: &str, user_id: &str) {
        let room = channel_room(channel_id);
        self.rooms
            .broadcast(&room, ServerEvent::MemberLeave(user_id.to_string()))
            .await;
        self.rooms.evict_user(&room, user_id).await;
    }

    pub async fn typing_status(&self, channel_id: &str, user_id: &str, is_typing: bool) {
        self.rooms
            .broadcast(
                &channel_room(channel_id),
                ServerEvent::TypingStatus {
                    user_id: user_id.to_string(),
                    is_typing,
                },
            )
            .await;
    }

    pub async fn city_matching_update(&self, city_id: &str, update: serde_json::Value) {
        self.rooms
            .broadcast(&city_room(city_id), ServerEvent::CityMatchingUpdate(update))
            .await;
    }

    pub async fn donation_assignment(&self, city_id: &str, donation_id: &str, soldier_id: &str) {
        self.rooms
            .broadcast(
                &city_room(city_id),
                ServerEvent::DonationAssignment {
                    donation_id: donation_id.to_string(),
                    soldier_id: soldier_id.to_string(),
                },
            )
            .await;
    }

    pub async fn new_donation(&self, city_id: &str, donation: serde_json::Value) {
        self.rooms
            .broadcast(&city_room(city_id), ServerEvent::NewDonation(donation))
            .await;
    }

    pub async fn donation_status_update(&self, city_id: &str, donation_id: &str, status: &str) {
        self.rooms
            .broadcast(
                &city_room(city_id),
                ServerEvent::DonationStatusUpdate {
                    donation_id: donation_id.to_string(),
                    status: status.to_string(),
                },
            )
            .await;
    }

    /// Direct notification to every live connection of one user, via the
    /// private per-user room joined at handshake.
    pub async fn notify_user(&self, user_id: &str, event: ServerEvent) {
        self.rooms
            .broadcast(&super::rooms::user_room(user_id), event)
            .await;
    }

    /// Presence lookup for REST callers (e.g. "is the assigned recipient
    /// online").
    pub async fn online_status(&self, user_ids: &[String]) -> HashMap<String, bool> {
        self.registry.online_status(user_ids).await
    }

    /// Live connection ids for a user; empty when offline.
    pub async fn connections_of(&self, user_id: &str) -> Vec<String> {
        self.registry.connections_of(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::metrics::GatewayMetrics;
    use crate::models::{User, UserRole};
    use crate::repository::test_helpers;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn gateway() -> Gateway {
        let repo = Arc::new(test_helpers::test_repository().await);
        Gateway::new(
            repo,
            Arc::new(GatewayMetrics::new()),
            GatewayConfig::default(),
        )
    }

    async fn connect(gw: &Gateway, conn_id: &str, user_id: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        gw.registry.register(conn_id, tx).await;
        gw.registry.bind_user(conn_id, user_id).await;
        rx
    }

    #[tokio::test]
    async fn typing_status_scoped_to_channel_room() {
        let gw = gateway().await;
        let mut in_room = connect(&gw, "conn-1", "user-a").await;
        let mut outside = connect(&gw, "conn-2", "user-b").await;
        gw.rooms.join("conn-1", &channel_room("c1")).await;

        gw.typing_status("c1", "user-a", true).await;

        match in_room.recv().await.unwrap() {
            ServerEvent::TypingStatus { user_id, is_typing } => {
                assert_eq!(user_id, "user-a");
                assert!(is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(outside.try_recv().is_err());
    }

    #[tokio::test]
    async fn member_left_broadcasts_then_evicts() {
        let gw = gateway().await;
        let mut removed = connect(&gw, "conn-1", "user-a").await;
        let mut remaining = connect(&gw, "conn-2", "user-b").await;
        gw.rooms.join("conn-1", &channel_room("c1")).await;
        gw.rooms.join("conn-2", &channel_room("c1")).await;

        gw.member_left("c1", "user-a").await;

        // Both subscribers see the announcement (including the removed user)
        assert!(matches!(
            removed.recv().await.unwrap(),
            ServerEvent::MemberLeave(ref id) if id == "user-a"
        ));
        assert!(matches!(
            remaining.recv().await.unwrap(),
            ServerEvent::MemberLeave(ref id) if id == "user-a"
        ));

        // The removed user's connection no longer receives channel traffic
        gw.message_deleted("c1", "m1").await;
        assert!(removed.try_recv().is_err());
        assert!(matches!(
            remaining.recv().await.unwrap(),
            ServerEvent::MessageDelete(ref id) if id == "m1"
        ));
    }

    #[tokio::test]
    async fn city_events_scoped_to_city_room() {
        let gw = gateway().await;
        let mut muni = connect(&gw, "conn-1", "user-m").await;
        gw.rooms.join("conn-1", &city_room("haifa")).await;

        gw.new_donation("haifa", serde_json::json!({"id": "d1"})).await;
        gw.donation_assignment("haifa", "d1", "s1").await;
        gw.donation_status_update("haifa", "d1", "delivered").await;
        gw.city_matching_update("haifa", serde_json::json!({"pending": 3}))
            .await;

        assert!(matches!(muni.recv().await.unwrap(), ServerEvent::NewDonation(_)));
        assert!(matches!(
            muni.recv().await.unwrap(),
            ServerEvent::DonationAssignment { .. }
        ));
        assert!(matches!(
            muni.recv().await.unwrap(),
            ServerEvent::DonationStatusUpdate { .. }
        ));
        assert!(matches!(
            muni.recv().await.unwrap(),
            ServerEvent::CityMatchingUpdate(_)
        ));
    }

    #[tokio::test]
    async fn notify_user_hits_private_room_only() {
        use crate::gateway::rooms::user_room;

        let gw = gateway().await;
        let mut target = connect(&gw, "conn-1", "user-a").await;
        let mut other = connect(&gw, "conn-2", "user-b").await;
        gw.rooms.join("conn-1", &user_room("user-a")).await;
        gw.rooms.join("conn-2", &user_room("user-b")).await;

        gw.notify_user(
            "user-a",
            ServerEvent::DonationAssignment {
                donation_id: "d1".into(),
                soldier_id: "user-a".into(),
            },
        )
        .await;

        assert!(matches!(
            target.recv().await.unwrap(),
            ServerEvent::DonationAssignment { .. }
        ));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_lookups() {
        let gw = gateway().await;
        let repo = gw.repository.clone();
        let user = User::new(
            "Test".into(),
            "User".into(),
            "a@example.com".into(),
            "hashed".into(),
            UserRole::Donor,
        );
        repo.create_user(&user).await.unwrap();

        let _rx = connect(&gw, "conn-1", &user.id).await;

        let status = gw
            .online_status(&[user.id.clone(), "nobody".to_string()])
            .await;
        assert!(status[&user.id]);
        assert!(!status["nobody"]);
        assert_eq!(gw.connections_of(&user.id).await, vec!["conn-1".to_string()]);
        assert!(gw.connections_of("nobody").await.is_empty());
    }
}
