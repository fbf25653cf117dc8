//! Pairing room management for pub/sub
//!
//! A room groups the connections of one couple. Relayed signals fan out to
//! every other member of the sender's room, however many there are.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::{Connection, DeliveryError};
use super::events::ServerEvent;

/// Manages pairing rooms for broadcasting events
pub struct RoomManager {
    /// Map of room name -> member connections
    rooms: Arc<RwLock<HashMap<String, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to the room it currently names
    pub async fn join(&self, conn: Arc<Connection>) {
        let room = conn.room().await;
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room.clone()).or_default();
        if !members.iter().any(|c| c.connection_id == conn.connection_id) {
            members.push(Arc::clone(&conn));
        }

        tracing::debug!(
            room = %room,
            connection_id = %conn.connection_id,
            room_size = members.len(),
            "Connection joined room"
        );
    }

    /// Move a connection into `room`, leaving its previous one
    pub async fn move_connection(&self, conn: &Arc<Connection>, room: String) {
        let mut rooms = self.rooms.write().await;
        let previous = conn.set_room(room.clone()).await;
        if previous == room {
            return;
        }

        if let Some(members) = rooms.get_mut(&previous) {
            members.retain(|c| c.connection_id != conn.connection_id);
            if members.is_empty() {
                rooms.remove(&previous);
            }
        }
        rooms.entry(room.clone()).or_default().push(Arc::clone(conn));

        tracing::info!(
            connection_id = %conn.connection_id,
            from = %previous,
            to = %room,
            "Connection moved to pairing room"
        );
    }

    /// Send an event to every member of `room` except `sender`.
    ///
    /// Returns the number of connections the event was queued for. Send
    /// failures are logged and skipped; closed connections are cleaned up by
    /// their own disconnect path.
    pub async fn broadcast_except(&self, room: &str, sender: Uuid, event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(room) else {
            tracing::debug!(room = %room, event = event.name(), "No room found - no recipients");
            return 0;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for conn in conns.iter().filter(|c| c.connection_id != sender) {
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    log_delivery_failure(conn, &event, e);
                }
            }
        }

        if event.is_audio() {
            tracing::trace!(room = %room, recipients = delivered, failed, "Relayed audio frame");
        } else {
            tracing::debug!(
                room = %room,
                event = event.name(),
                recipients = delivered,
                failed,
                "Broadcast event to room"
            );
        }

        delivered
    }

    /// Remove a connection from all rooms
    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        for conns in rooms.values_mut() {
            conns.retain(|c| c.connection_id != *connection_id);
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());
    }

    /// Get room size (number of connections)
    pub async fn get_room_size(&self, room: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn log_delivery_failure(conn: &Connection, event: &ServerEvent, err: DeliveryError) {
    match err {
        DeliveryError::Congested if event.is_audio() => tracing::debug!(
            connection_id = %conn.connection_id,
            dropped_total = conn.dropped_events(),
            "Dropped audio frame for congested connection"
        ),
        DeliveryError::Congested => tracing::warn!(
            connection_id = %conn.connection_id,
            event = event.name(),
            dropped_total = conn.dropped_events(),
            "Dropped event for congested connection"
        ),
        DeliveryError::Closed => tracing::warn!(
            connection_id = %conn.connection_id,
            event = event.name(),
            "Failed to send event to connection (likely closed)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection(room: &str) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Connection::new(tx, room)), rx)
    }

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let room_manager = RoomManager::new();
        let (conn, _rx) = connection("couple");

        assert_eq!(room_manager.get_room_size("couple").await, 0);

        room_manager.join(Arc::clone(&conn)).await;
        room_manager.join(Arc::clone(&conn)).await;
        assert_eq!(room_manager.get_room_size("couple").await, 1);

        room_manager.remove_connection(&conn.connection_id).await;
        assert_eq!(room_manager.get_room_size("couple").await, 0);
        assert_eq!(room_manager.get_room_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let room_manager = RoomManager::new();
        let (conn1, mut rx1) = connection("couple");
        let (conn2, mut rx2) = connection("couple");
        let (conn3, mut rx3) = connection("couple");

        room_manager.join(Arc::clone(&conn1)).await;
        room_manager.join(conn2).await;
        room_manager.join(conn3).await;

        let delivered = room_manager
            .broadcast_except("couple", conn1.connection_id, ServerEvent::CheckSunset)
            .await;

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_stays_inside_room() {
        let room_manager = RoomManager::new();
        let (sender, _rx) = connection("pair-a");
        let (partner, mut partner_rx) = connection("pair-a");
        let (stranger, mut stranger_rx) = connection("pair-b");

        room_manager.join(Arc::clone(&sender)).await;
        room_manager.join(partner).await;
        room_manager.join(stranger).await;

        room_manager
            .broadcast_except("pair-a", sender.connection_id, ServerEvent::CheckSunset)
            .await;

        assert!(partner_rx.try_recv().is_ok());
        assert!(stranger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_move_connection() {
        let room_manager = RoomManager::new();
        let (conn, _rx) = connection("couple");
        room_manager.join(Arc::clone(&conn)).await;

        room_manager.move_connection(&conn, "pair-42".to_string()).await;

        assert_eq!(conn.room().await, "pair-42");
        assert_eq!(room_manager.get_room_size("couple").await, 0);
        assert_eq!(room_manager.get_room_size("pair-42").await, 1);
        assert_eq!(room_manager.get_room_count().await, 1);
    }

    #[tokio::test]
    async fn test_congested_peer_does_not_block_others() {
        let room_manager = RoomManager::new();
        let (sender, _rx) = connection("couple");
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let slow = Arc::new(Connection::new(tx_slow, "couple"));
        let (fast, mut fast_rx) = connection("couple");

        room_manager.join(Arc::clone(&sender)).await;
        room_manager.join(Arc::clone(&slow)).await;
        room_manager.join(fast).await;

        for _ in 0..3 {
            room_manager
                .broadcast_except("couple", sender.connection_id, ServerEvent::CheckSunset)
                .await;
        }

        assert_eq!(slow.dropped_events(), 2);
        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }
}
