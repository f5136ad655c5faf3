use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::gateway::{ConnectParams, handle_socket};

/// Gateway entry point: upgrades to WebSocket and hands the connection to
/// the handshake controller. The bearer token travels in the query string
/// (the upgrade request cannot carry a body) and is verified inside the
/// connection, not by the HTTP middleware.
pub async fn socket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, params))
}
