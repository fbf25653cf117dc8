//! WebSocket connection management
//!
//! Represents one live transport connection with its bounded outbound queue.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

/// Why an event could not be queued for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Outbound queue is full; the event was dropped
    #[error("outbound queue full")]
    Congested,
    /// The connection's writer has gone away
    #[error("connection closed")]
    Closed,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this transport connection
    pub connection_id: Uuid,

    /// Bounded channel feeding this connection's writer task
    sender: mpsc::Sender<ServerEvent>,

    /// Room this connection currently broadcasts to and receives from
    room: RwLock<String>,

    /// Events dropped because the outbound queue was full
    dropped_events: AtomicU64,
}

impl Connection {
    /// Create a new connection placed in `room`
    pub fn new(sender: mpsc::Sender<ServerEvent>, room: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            sender,
            room: RwLock::new(room.into()),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Queue an event without waiting.
    ///
    /// A full queue drops the event and bumps the drop counter so a slow peer
    /// never stalls the sender.
    pub fn send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Congested)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Total events dropped for congestion
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Current room name
    pub async fn room(&self) -> String {
        self.room.read().await.clone()
    }

    /// Move to another room, returning the previous one
    pub(crate) async fn set_room(&self, room: String) -> String {
        let mut current = self.room.write().await;
        std::mem::replace(&mut *current, room)
    }
}
