//! WebSocket relay for the couple's real-time features
//!
//! Provides the presence and pairwise signaling layer:
//! - Presence tracking (`partner-online` / `partner-offline`)
//! - Together Mode handshake and live audio relay
//! - Photo, voice message, typing and sunset notifications
//! - Periodic `check-sunset` reminders to every connection
//!
//! # Architecture
//!
//! - **Connection**: A live WebSocket with a bounded outbound queue
//! - **Room**: Pairing-scoped pub/sub; signals go to every other member
//! - **State**: Connections, rooms and the presence map, shared by all sockets
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe signal definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod room;
pub mod state;

pub use handler::ws_handler;
pub use state::{ConnectedSession, RelayState, RelayStats};
