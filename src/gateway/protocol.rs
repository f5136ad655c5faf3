//! Gateway wire protocol
//!
//! Frames are JSON objects `{ "event": <name>, "data": <payload> }`. Event
//! names match what deployed web clients already emit and listen for, so the
//! serde renames below are load-bearing.

use serde::{Deserialize, Serialize};

use crate::models::{MessageView, PublicProfile};

/// Events sent FROM the client TO the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Late authentication for connections opened without a token
    #[serde(rename = "authenticate")]
    Authenticate(String),

    /// Subscribe to a channel's room (membership-checked)
    #[serde(rename = "join channel")]
    JoinChannel(String),

    /// Unsubscribe from a channel's room
    #[serde(rename = "leave channel")]
    LeaveChannel(String),

    /// Create a message in a channel
    #[serde(rename = "new message")]
    NewMessage(NewMessagePayload),

    /// Subscribe to a city's broadcast scope
    #[serde(rename = "join_city")]
    JoinCity(String),

    /// Unsubscribe from a city's broadcast scope
    #[serde(rename = "leave_city")]
    LeaveCity(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub channel_id: String,
    pub content: String,
    /// Sent by existing clients. Ignored: the sender identity is resolved
    /// from the connection registry, never from the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Events sent FROM the server TO the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    // === Handshake signals ===
    /// Handshake succeeded — the connection is bound to a user
    #[serde(rename = "authenticated")]
    Authenticated,
    /// Handshake failed or was skipped
    #[serde(rename = "auth_error")]
    AuthError(String),
    /// Acknowledges the initial-room hint from the connect request
    #[serde(rename = "room-joined")]
    RoomJoined(String),

    // === Channel-room events ===
    /// A newly persisted message, including back to the sender
    #[serde(rename = "message received")]
    MessageReceived(MessageView),
    #[serde(rename = "message_update")]
    MessageUpdate {
        #[serde(rename = "messageId")]
        message_id: String,
        update: serde_json::Value,
    },
    /// Payload is the deleted message id
    #[serde(rename = "message_delete")]
    MessageDelete(String),
    #[serde(rename = "channel_update")]
    ChannelUpdate(serde_json::Value),
    /// Payload is the joining member's public profile
    #[serde(rename = "member_join")]
    MemberJoin(PublicProfile),
    /// Payload is the leaving member's user id
    #[serde(rename = "member_leave")]
    MemberLeave(String),
    #[serde(rename = "typing_status")]
    TypingStatus {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    // === City-room events ===
    #[serde(rename = "city_matching_update")]
    CityMatchingUpdate(serde_json::Value),
    #[serde(rename = "donation_assignment")]
    DonationAssignment {
        #[serde(rename = "donationId")]
        donation_id: String,
        #[serde(rename = "soldierId")]
        soldier_id: String,
    },
    #[serde(rename = "new_donation")]
    NewDonation(serde_json::Value),
    #[serde(rename = "donation_status_update")]
    DonationStatusUpdate {
        #[serde(rename = "donationId")]
        donation_id: String,
        status: String,
    },

    // === Pipeline failures, sent to the originating connection only ===
    #[serde(rename = "error")]
    Error { message: String },
}
