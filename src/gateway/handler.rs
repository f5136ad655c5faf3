//! WebSocket connection handler
//!
//! Runs the handshake once per connection, then turns each incoming frame
//! into a typed command for the pipeline or room manager. Delivery to the
//! client goes through a bounded mpsc channel drained by a dedicated sender
//! task, so per-connection ordering is the channel's FIFO order.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Gateway;
use super::protocol::{ClientEvent, ServerEvent};
use super::rooms::{channel_room, city_room, user_room};

/// Query parameters of the connect request: both are optional — a
/// connection without a token stays open but observes nothing until a
/// later `authenticate` event.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    #[serde(rename = "channelId")]
    pub channel_id: Option<String>,
}

/// Handle one WebSocket connection for its whole lifetime.
pub async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, params: ConnectParams) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %connection_id, "New gateway connection");
    gateway.metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for events to this client; the registry holds the sender so
    // broadcasts from any task reach this connection
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(gateway.config.send_channel_capacity);
    gateway.registry.register(&connection_id, tx).await;

    // Handshake: verify the optional bearer token before processing events
    if let Some(token) = params.token.as_deref() {
        authenticate_connection(&gateway, &connection_id, token, params.channel_id.as_deref())
            .await;
    }

    // Task to send events to the WebSocket
    let metrics_sender = gateway.metrics.clone();
    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics_sender.event_sent();
        }
    };

    // Task to handle incoming frames
    let gateway_input = gateway.clone();
    let connection_id_input = connection_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    gateway_input.metrics.event_received();
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            dispatch_client_event(&gateway_input, &connection_id_input, event)
                                .await;
                        }
                        Err(e) => {
                            debug!(conn_id = %connection_id_input, "Unparseable frame: {}", e);
                            gateway_input
                                .registry
                                .send_to(
                                    &connection_id_input,
                                    ServerEvent::Error {
                                        message: "malformed event".to_string(),
                                    },
                                )
                                .await;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %connection_id_input, "Client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(conn_id = %connection_id_input, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %connection_id, "Sender task ended"),
        _ = input_task => debug!(conn_id = %connection_id, "Input task ended"),
    }

    // Disconnect: drop the registry entry and every room subscription
    if let Some(gone) = gateway.registry.unregister(&connection_id).await {
        gateway.rooms.drop_connection(&connection_id, &gone.rooms).await;
        info!(
            conn_id = %connection_id,
            user = gone.user_id.as_deref().unwrap_or("anonymous"),
            rooms = gone.rooms.len(),
            "Gateway connection closed"
        );
    }
    gateway.metrics.connection_closed();
}

/// Verify a bearer token and bind the connection on success. Emits
/// `authenticated` / `auth_error`; a failed handshake leaves the connection
/// open but unbound.
pub(crate) async fn authenticate_connection(
    gateway: &Gateway,
    connection_id: &str,
    token: &str,
    channel_hint: Option<&str>,
) {
    let user = match gateway.repository.get_session_user(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            gateway.metrics.auth_failure();
            gateway
                .registry
                .send_to(
                    connection_id,
                    ServerEvent::AuthError("Authentication failed".to_string()),
                )
                .await;
            return;
        }
        Err(e) => {
            error!(conn_id = %connection_id, "Identity lookup failed: {}", e);
            gateway.metrics.auth_failure();
            gateway
                .registry
                .send_to(
                    connection_id,
                    ServerEvent::AuthError("Authentication failed".to_string()),
                )
                .await;
            return;
        }
    };

    if !gateway.registry.bind_user(connection_id, &user.id).await {
        // Connection raced away during verification
        return;
    }

    // Private per-user room for direct notifications
    gateway
        .rooms
        .join(connection_id, &user_room(&user.id))
        .await;

    if let Some(channel_id) = channel_hint {
        join_channel(gateway, connection_id, &user.id, channel_id, true).await;
    }

    gateway
        .registry
        .send_to(connection_id, ServerEvent::Authenticated)
        .await;
    info!(conn_id = %connection_id, user = %user.id, "Connection authenticated");
}

/// Membership-checked subscription to a channel room. The initial-room
/// hint acknowledges with `room-joined`; explicit joins are silent.
async fn join_channel(
    gateway: &Gateway,
    connection_id: &str,
    user_id: &str,
    channel_id: &str,
    ack: bool,
) {
    match gateway.repository.is_channel_member(channel_id, user_id).await {
        Ok(true) => {
            let room = channel_room(channel_id);
            gateway.rooms.join(connection_id, &room).await;
            if ack {
                gateway
                    .registry
                    .send_to(connection_id, ServerEvent::RoomJoined(room))
                    .await;
            }
        }
        Ok(false) => {
            gateway
                .registry
                .send_to(
                    connection_id,
                    ServerEvent::Error {
                        message: "not a member of this channel".to_string(),
                    },
                )
                .await;
        }
        Err(e) => {
            error!(conn_id = %connection_id, channel = %channel_id, "Membership check failed: {}", e);
            gateway
                .registry
                .send_to(
                    connection_id,
                    ServerEvent::Error {
                        message: "persistence failure".to_string(),
                    },
                )
                .await;
        }
    }
}

/// Dispatch a single client event. Every operation that observes anything
/// requires the connection to be bound to a user first.
pub(crate) async fn dispatch_client_event(
    gateway: &Gateway,
    connection_id: &str,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Authenticate(token) => {
            authenticate_connection(gateway, connection_id, &token, None).await;
        }
        ClientEvent::JoinChannel(channel_id) => {
            match gateway.registry.user_of(connection_id).await {
                Some(user_id) => {
                    join_channel(gateway, connection_id, &user_id, &channel_id, false).await;
                }
                None => {
                    gateway
                        .registry
                        .send_to(
                            connection_id,
                            ServerEvent::Error {
                                message: "authentication required".to_string(),
                            },
                        )
                        .await;
                }
            }
        }
        ClientEvent::LeaveChannel(channel_id) => {
            gateway
                .rooms
                .leave(connection_id, &channel_room(&channel_id))
                .await;
        }
        ClientEvent::NewMessage(payload) => {
            // payload.sender is deliberately unused: identity comes from the
            // registry populated at handshake
            if let Err(err) = gateway
                .pipeline
                .send(connection_id, &payload.channel_id, &payload.content)
                .await
            {
                debug!(conn_id = %connection_id, channel = %payload.channel_id, "send failed: {}", err);
                gateway
                    .registry
                    .send_to(
                        connection_id,
                        ServerEvent::Error {
                            message: err.to_string(),
                        },
                    )
                    .await;
            }
        }
        ClientEvent::JoinCity(city_id) => {
            if gateway.registry.user_of(connection_id).await.is_some() {
                gateway
                    .rooms
                    .join(connection_id, &city_room(&city_id))
                    .await;
            } else {
                gateway
                    .registry
                    .send_to(
                        connection_id,
                        ServerEvent::Error {
                            message: "authentication required".to_string(),
                        },
                    )
                    .await;
            }
        }
        ClientEvent::LeaveCity(city_id) => {
            gateway
                .rooms
                .leave(connection_id, &city_room(&city_id))
                .await;
        }
    }
}
