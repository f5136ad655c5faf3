//! Real-time messaging gateway
//!
//! One WebSocket connection per client that:
//! - Authenticates once at handshake (or later via an `authenticate` event)
//! - Joins rooms backed by persisted channel membership
//! - Receives broadcasts for every room it is subscribed to

mod broadcast;
mod handler;
mod pipeline;
mod protocol;
mod registry;
mod rooms;

// Re-export the main types and functions
pub use handler::{handle_socket, ConnectParams};
pub use pipeline::{GatewayError, MessagePipeline};
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::ConnectionRegistry;
pub use rooms::{channel_room, city_room, user_room, RoomManager};

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::metrics::GatewayMetrics;
use crate::repository::CommunityRepository;

/// The gateway service object: owns the only mutable shared state in the
/// server (registry + rooms) and the pipeline over the durable stores.
/// Constructed once at startup and passed by reference to every handler.
pub struct Gateway {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub pipeline: MessagePipeline,
    pub repository: Arc<CommunityRepository>,
    pub metrics: Arc<GatewayMetrics>,
    pub config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        repository: Arc<CommunityRepository>,
        metrics: Arc<GatewayMetrics>,
        config: GatewayConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(registry.clone(), metrics.clone()));
        let pipeline = MessagePipeline::new(registry.clone(), rooms.clone(), repository.clone());
        Self {
            registry,
            rooms,
            pipeline,
            repository,
            metrics,
            config,
        }
    }
}
