//! Mi Pedacito shared types and utilities
//!
//! This crate contains types, errors, and database helpers shared by the relay
//! server and any future binaries that read the connection audit log.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
