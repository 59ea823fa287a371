//! WebSocket API support

pub mod handler;
pub mod messages;

pub use handler::ws_handler;
pub use messages::{
    response_envelope, ClientMessage, ConfigInstruction, GraphInstruction, ServerMessage,
};
