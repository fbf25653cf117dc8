//! Mi Pedacito relay library
//!
//! This crate contains the real-time relay server: presence tracking,
//! Together Mode signaling and live audio fan-out between paired accounts,
//! plus the connection audit log and health endpoints.

pub mod audit;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use shutdown::ShutdownCoordinator;
pub use state::AppState;
