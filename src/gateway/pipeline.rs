//! Message Pipeline
//!
//! Turns a `new message` command into a durable row plus a room broadcast.
//! The broadcast strictly follows successful persistence: a failed write
//! produces an error for the originating connection and nothing else.

use std::sync::Arc;
use tracing::debug;

use super::protocol::ServerEvent;
use super::registry::ConnectionRegistry;
use super::rooms::{RoomManager, channel_room};
use crate::models::{MAX_MESSAGE_LEN, Message, MessageView};
use crate::repository::CommunityRepository;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The connection is not bound to a verified user
    #[error("authentication required")]
    NotAuthenticated,
    /// The user is not in the channel's member set
    #[error("not a member of this channel")]
    NotAMember,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

pub struct MessagePipeline {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    repository: Arc<CommunityRepository>,
}

impl MessagePipeline {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        repository: Arc<CommunityRepository>,
    ) -> Self {
        Self {
            registry,
            rooms,
            repository,
        }
    }

    /// Create a message on behalf of a live connection. The sender identity
    /// comes from the registry only — a claimed sender id in the payload is
    /// never trusted.
    pub async fn send(
        &self,
        connection_id: &str,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageView, GatewayError> {
        let user_id = self
            .registry
            .user_of(connection_id)
            .await
            .ok_or(GatewayError::NotAuthenticated)?;
        self.send_as_user(&user_id, channel_id, content).await
    }

    /// The shared durable path, also used by the REST createMessage
    /// endpoint (where the user is resolved by the bearer middleware).
    pub async fn send_as_user(
        &self,
        user_id: &str,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageView, GatewayError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GatewayError::MalformedPayload("empty content".into()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(GatewayError::MalformedPayload(format!(
                "content exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        // The member set is the sole access-control gate for message creation
        let is_member = self
            .repository
            .is_channel_member(channel_id, user_id)
            .await?;
        if !is_member {
            return Err(GatewayError::NotAMember);
        }

        let message = Message::new(
            channel_id.to_string(),
            user_id.to_string(),
            content.to_string(),
        );
        self.repository.insert_message(&message).await?;

        let view = self
            .repository
            .get_message_view(&message.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("message {} vanished after insert", message.id))?;

        // Broadcast only after the write landed, including back to the
        // sender's own connection so all clients converge on one object
        self.rooms
            .broadcast(&channel_room(channel_id), ServerEvent::MessageReceived(view.clone()))
            .await;

        Ok(view)
    }

    /// Mark every message in a channel as read by the user. Idempotent;
    /// invoked from the REST history fetch, not the live connection.
    pub async fn mark_read(&self, user_id: &str, channel_id: &str) -> Result<u64, GatewayError> {
        let marked = self.repository.mark_channel_read(user_id, channel_id).await?;
        if marked > 0 {
            debug!(user_id = %user_id, channel_id = %channel_id, count = marked, "marked messages read");
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::models::{Channel, ChannelKind, User, UserRole};
    use crate::repository::test_helpers;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        pipeline: MessagePipeline,
        repo: Arc<CommunityRepository>,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(test_helpers::test_repository().await);
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            Arc::new(GatewayMetrics::new()),
        ));
        let pipeline = MessagePipeline::new(registry.clone(), rooms.clone(), repo.clone());
        Fixture {
            registry,
            rooms,
            pipeline,
            repo,
        }
    }

    async fn seed_user(repo: &CommunityRepository, email: &str) -> User {
        let user = User::new(
            "Test".into(),
            email.split('@').next().unwrap().to_string(),
            email.into(),
            "hashed".into(),
            UserRole::Donor,
        );
        repo.create_user(&user).await.unwrap();
        user
    }

    async fn connect(
        fx: &Fixture,
        connection_id: &str,
        user: &User,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        fx.registry.register(connection_id, tx).await;
        fx.registry.bind_user(connection_id, &user.id).await;
        rx
    }

    #[tokio::test]
    async fn send_persists_and_broadcasts_matching_payloads() {
        // User A and B are members of c1; A is connected and joined, B offline
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let bob = seed_user(&fx.repo, "bob@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo
            .create_channel(&channel, &alice.id, &[bob.id.clone()])
            .await
            .unwrap();

        let mut rx = connect(&fx, "conn-a", &alice).await;
        fx.rooms.join("conn-a", &channel_room("c1")).await;

        let view = fx.pipeline.send("conn-a", "c1", "hello").await.unwrap();
        assert_eq!(view.content, "hello");
        assert_eq!(view.sender.id, alice.id);
        assert_eq!(view.read_by, vec![alice.id.clone()]);

        // A's own connection receives the broadcast
        match rx.recv().await.unwrap() {
            ServerEvent::MessageReceived(broadcast) => {
                // Broadcast payload matches the durable record field-for-field
                let (stored, _) = fx.repo.list_messages("c1", 1, 10).await.unwrap();
                assert_eq!(stored.len(), 1);
                let stored = &stored[0];
                assert_eq!(broadcast.id, stored.id);
                assert_eq!(broadcast.content, stored.content);
                assert_eq!(broadcast.sender, stored.sender);
                assert_eq!(broadcast.read_by, stored.read_by);
                assert_eq!(broadcast.created_at, stored.created_at);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_member_send_is_rejected_without_persisting() {
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let carol = seed_user(&fx.repo, "carol@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo.create_channel(&channel, &alice.id, &[]).await.unwrap();

        let mut alice_rx = connect(&fx, "conn-a", &alice).await;
        fx.rooms.join("conn-a", &channel_room("c1")).await;
        let _carol_rx = connect(&fx, "conn-c", &carol).await;

        let err = fx.pipeline.send("conn-c", "c1", "let me in").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotAMember));

        // Nothing persisted, nothing broadcast
        let (stored, _) = fx.repo.list_messages("c1", 1, 10).await.unwrap();
        assert!(stored.is_empty());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unauthenticated_connection_cannot_send() {
        let fx = fixture().await;
        let (tx, _rx) = mpsc::channel(8);
        fx.registry.register("conn-x", tx).await;

        let err = fx.pipeline.send("conn-x", "c1", "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated));
    }

    #[tokio::test]
    async fn claimed_sender_in_payload_is_irrelevant() {
        // A connection that never completed the handshake fails even though
        // the wire payload carries a plausible sender id
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo.create_channel(&channel, &alice.id, &[]).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        fx.registry.register("conn-x", tx).await;

        // The pipeline's only identity input is the connection id
        let err = fx.pipeline.send("conn-x", "c1", "spoofed").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated));
        let (stored, _) = fx.repo.list_messages("c1", 1, 10).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn malformed_content_rejected() {
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo.create_channel(&channel, &alice.id, &[]).await.unwrap();
        let _rx = connect(&fx, "conn-a", &alice).await;

        let err = fx.pipeline.send("conn-a", "c1", "   ").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedPayload(_)));

        let oversized = "x".repeat(MAX_MESSAGE_LEN + 1);
        let err = fx.pipeline.send("conn-a", "c1", &oversized).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn mark_read_adds_all_and_is_idempotent() {
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let bob = seed_user(&fx.repo, "bob@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo
            .create_channel(&channel, &alice.id, &[bob.id.clone()])
            .await
            .unwrap();
        let _rx = connect(&fx, "conn-a", &alice).await;

        fx.pipeline.send("conn-a", "c1", "one").await.unwrap();
        fx.pipeline.send("conn-a", "c1", "two").await.unwrap();

        assert_eq!(fx.pipeline.mark_read(&bob.id, "c1").await.unwrap(), 2);
        // Re-calling leaves the sets unchanged
        assert_eq!(fx.pipeline.mark_read(&bob.id, "c1").await.unwrap(), 0);

        let (messages, _) = fx.repo.list_messages("c1", 1, 10).await.unwrap();
        for view in messages {
            assert!(view.read_by.contains(&bob.id));
        }
    }

    #[tokio::test]
    async fn offline_members_still_see_history() {
        // B never connects; the durable path serves the message anyway
        let fx = fixture().await;
        let alice = seed_user(&fx.repo, "alice@example.com").await;
        let bob = seed_user(&fx.repo, "bob@example.com").await;
        let mut channel = Channel::new("c1".into(), ChannelKind::Group);
        channel.id = "c1".into();
        fx.repo
            .create_channel(&channel, &alice.id, &[bob.id.clone()])
            .await
            .unwrap();
        let _rx = connect(&fx, "conn-a", &alice).await;

        fx.pipeline.send("conn-a", "c1", "hello").await.unwrap();

        let (messages, has_more) = fx.repo.list_messages("c1", 1, 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!has_more);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].read_by, vec![alice.id.clone()]);
    }
}
