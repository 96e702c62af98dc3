//! Real-time fan-out to WebSocket sessions

pub mod gateway;
pub mod session;

pub use gateway::{ClientMessage, ConnectionId, Gateway, ServerMessage, Topic};
pub use session::{Channel, ClientSession, Flow};
