pub mod channels;
pub mod health;
pub mod messages;
pub mod presence;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use channels::{
    add_members, create_channel, delete_channel, get_channel, list_channels, remove_member,
    update_channel,
};
pub use health::{health_handler, metrics_handler};
pub use messages::{create_message, delete_message, list_messages, update_message};
pub use presence::{city_event, get_online_status, typing_status};
pub use websocket::socket_handler;
