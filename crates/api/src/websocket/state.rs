//! Relay state: live connections, presence and signal fan-out
//!
//! `RelayState` owns the only shared mutable state of the relay: the set of
//! transport connections, the rooms they belong to, and the presence map of
//! joined users. It is mutated exclusively through the operations below;
//! outside callers only get snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use pedacito_shared::ConnectionAction;

use super::connection::Connection;
use super::events::{ClientEvent, ServerEvent};
use super::room::{log_delivery_failure, RoomManager};
use crate::audit::AuditLog;

/// A user bound to a live connection by `join`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedSession {
    pub user_id: String,
    pub connection_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub room: String,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

/// Global relay state shared across all connections
#[derive(Clone)]
pub struct RelayState {
    /// All live connections indexed by connection_id
    connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Joined users indexed by user_id; at most one session per user
    sessions: Arc<RwLock<HashMap<String, ConnectedSession>>>,

    /// Pairing rooms
    rooms: Arc<RoomManager>,

    audit: AuditLog,

    default_room: Arc<str>,
}

impl RelayState {
    /// Create new relay state
    pub fn new(audit: AuditLog, default_room: impl Into<String>) -> Self {
        let default_room: String = default_room.into();
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
            audit,
            default_room: default_room.into(),
        }
    }

    /// Room every new connection starts in
    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Register a live connection and place it in its room
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let total = {
            let mut connections = self.connections.write().await;
            connections.insert(conn.connection_id, Arc::clone(&conn));
            connections.len()
        };
        self.rooms.join(Arc::clone(&conn)).await;

        tracing::info!(
            connection_id = %conn.connection_id,
            total_connections = total,
            "WebSocket connection added"
        );

        conn
    }

    /// Dispatch one inbound signal from `conn`
    pub async fn handle_signal(&self, conn: &Arc<Connection>, event: ClientEvent) {
        match event {
            ClientEvent::Join {
                user_id,
                username,
                pair_id,
            } => match user_id {
                Some(user_id) => self.join(conn, user_id, username, pair_id).await,
                None => {
                    tracing::warn!(connection_id = %conn.connection_id, "Ignoring join without userId");
                }
            },
            other => {
                self.relay(conn, other).await;
            }
        }
    }

    /// Bind `user_id` to `conn` and announce it to the rest of the room.
    ///
    /// A second join for the same user replaces the earlier session; the old
    /// transport is left open and becomes a ghost until it disconnects.
    pub async fn join(
        &self,
        conn: &Arc<Connection>,
        user_id: String,
        username: Option<String>,
        pair_id: Option<String>,
    ) {
        if let Some(pair_id) = pair_id.filter(|p| !p.trim().is_empty()) {
            self.rooms.move_connection(conn, pair_id).await;
        }
        let room = conn.room().await;

        let session = ConnectedSession {
            user_id: user_id.clone(),
            connection_id: conn.connection_id,
            display_name: username.clone(),
            room: room.clone(),
            joined_at: OffsetDateTime::now_utc(),
        };

        let replaced = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(user_id.clone(), session)
        };
        if let Some(previous) = replaced.filter(|p| p.connection_id != conn.connection_id) {
            tracing::info!(
                user_id = %user_id,
                previous_connection_id = %previous.connection_id,
                connection_id = %conn.connection_id,
                "Join replaced an existing session for user"
            );
        }

        self.audit.record(&user_id, ConnectionAction::Connected);

        let recipients = self
            .rooms
            .broadcast_except(
                &room,
                conn.connection_id,
                ServerEvent::PartnerOnline {
                    user_id: user_id.clone(),
                    username: username.clone(),
                },
            )
            .await;
        let room_size = self.rooms.get_room_size(&room).await;

        tracing::info!(
            user_id = %user_id,
            username = username.as_deref().unwrap_or_default(),
            connection_id = %conn.connection_id,
            room = %room,
            room_size,
            recipients,
            "User joined"
        );
    }

    /// Forward a signaling event to every other member of the sender's room.
    ///
    /// Returns the number of recipients.
    pub async fn relay(&self, conn: &Arc<Connection>, event: ClientEvent) -> usize {
        let signal = event.name();
        let Some(outbound) = event.into_relay_event() else {
            return 0;
        };

        let room = conn.room().await;
        let is_audio = outbound.is_audio();
        let recipients = self
            .rooms
            .broadcast_except(&room, conn.connection_id, outbound)
            .await;

        if !is_audio {
            tracing::info!(
                connection_id = %conn.connection_id,
                room = %room,
                signal,
                recipients,
                "Relayed signal"
            );
        }

        recipients
    }

    /// Handle the transport closing for `connection_id`.
    ///
    /// Removes the connection and any session still bound to it, writes one
    /// `disconnected` audit record and one `partner-offline` per removed
    /// session. A connection that never joined (or was superseded by a newer
    /// join) produces no audit record and no broadcast.
    pub async fn disconnect(&self, connection_id: &Uuid) {
        let removed_conn = {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id)
        };
        self.rooms.remove_connection(connection_id).await;

        let removed_sessions: Vec<ConnectedSession> = {
            let mut sessions = self.sessions.write().await;
            let user_ids: Vec<String> = sessions
                .values()
                .filter(|s| s.connection_id == *connection_id)
                .map(|s| s.user_id.clone())
                .collect();
            user_ids
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };

        for session in &removed_sessions {
            self.audit.record(&session.user_id, ConnectionAction::Disconnected);

            let recipients = self
                .rooms
                .broadcast_except(
                    &session.room,
                    *connection_id,
                    ServerEvent::PartnerOffline {
                        user_id: session.user_id.clone(),
                    },
                )
                .await;

            tracing::info!(
                user_id = %session.user_id,
                connection_id = %connection_id,
                room = %session.room,
                recipients,
                "User disconnected"
            );
        }

        if let Some(conn) = removed_conn {
            tracing::info!(
                connection_id = %connection_id,
                dropped_events = conn.dropped_events(),
                was_joined = !removed_sessions.is_empty(),
                "WebSocket connection removed"
            );
        }
    }

    /// Send `event` to every live connection, regardless of room.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn broadcast_all(&self, event: ServerEvent) -> usize {
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for conn in connections.values() {
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => log_delivery_failure(conn, &event, e),
            }
        }
        delivered
    }

    /// Periodic sunset reminder sent to every connection
    pub async fn check_sunset(&self) -> usize {
        let recipients = self.broadcast_all(ServerEvent::CheckSunset).await;
        tracing::info!(recipients, "Sent check-sunset reminder");
        recipients
    }

    /// Read-only snapshot of joined users
    pub async fn presence_snapshot(&self) -> Vec<ConnectedSession> {
        let sessions = self.sessions.read().await;
        let mut snapshot: Vec<ConnectedSession> = sessions.values().cloned().collect();
        snapshot.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        snapshot
    }

    /// Session currently bound to `user_id`, if the user is online
    pub async fn session_for(&self, user_id: &str) -> Option<ConnectedSession> {
        let sessions = self.sessions.read().await;
        sessions.get(user_id).cloned()
    }

    /// Get total number of live connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get number of joined users
    pub async fn online_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Get statistics about the relay
    pub async fn get_stats(&self) -> RelayStats {
        RelayStats {
            active_connections: self.connection_count().await,
            online_users: self.online_count().await,
            active_rooms: self.rooms.get_room_count().await,
        }
    }
}

/// Statistics about relay connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Number of live transport connections
    pub active_connections: usize,
    /// Number of joined users
    pub online_users: usize,
    /// Number of non-empty rooms
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::RecordingSink;
    use tokio::sync::mpsc;

    struct Harness {
        relay: RelayState,
        sink: Arc<RecordingSink>,
        writer: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn new() -> Self {
            let sink = Arc::new(RecordingSink::default());
            let (audit, writer) = AuditLog::spawn(sink.clone(), 64);
            Self {
                relay: RelayState::new(audit, "couple"),
                sink,
                writer,
            }
        }

        async fn connect(&self) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let conn = self
                .relay
                .add_connection(Connection::new(tx, self.relay.default_room()))
                .await;
            (conn, rx)
        }

        /// Drop the relay and wait for every queued audit record to land
        async fn finish(self) -> Vec<(String, ConnectionAction)> {
            drop(self.relay);
            self.writer.await.unwrap();
            self.sink.actions()
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn join(user: &str) -> ClientEvent {
        ClientEvent::Join {
            user_id: Some(user.to_string()),
            username: Some(user.to_uppercase()),
            pair_id: None,
        }
    }

    #[tokio::test]
    async fn test_presence_count_tracks_distinct_joined_users() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (b, _rx_b) = h.connect().await;
        let (c, _rx_c) = h.connect().await;

        h.relay.handle_signal(&a, join("ana")).await;
        h.relay.handle_signal(&b, join("luis")).await;
        h.relay.handle_signal(&c, join("sol")).await;
        assert_eq!(h.relay.online_count().await, 3);

        h.relay.disconnect(&b.connection_id).await;
        assert_eq!(h.relay.online_count().await, 2);
        assert!(h.relay.session_for("luis").await.is_none());
        assert_eq!(h.relay.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_join_announces_partner_online_to_others_only() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;

        h.relay.handle_signal(&a, join("ana")).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::PartnerOnline {
                user_id: "ana".to_string(),
                username: Some("ANA".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_join_then_disconnect_emits_one_partner_offline() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;
        let (_c, mut rx_c) = h.connect().await;

        h.relay.handle_signal(&a, join("ana")).await;
        drain(&mut rx_b);
        drain(&mut rx_c);

        h.relay.disconnect(&a.connection_id).await;

        let offline = ServerEvent::PartnerOffline {
            user_id: "ana".to_string(),
        };
        assert_eq!(drain(&mut rx_b), vec![offline.clone()]);
        assert_eq!(drain(&mut rx_c), vec![offline]);
        assert_eq!(h.relay.online_count().await, 0);

        assert_eq!(
            h.finish().await,
            vec![
                ("ana".to_string(), ConnectionAction::Connected),
                ("ana".to_string(), ConnectionAction::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_removes_every_session_bound_to_connection() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;

        // One socket asserting two identities
        h.relay.handle_signal(&a, join("ana")).await;
        h.relay.handle_signal(&a, join("luis")).await;
        assert_eq!(h.relay.online_count().await, 2);
        drain(&mut rx_b);

        h.relay.disconnect(&a.connection_id).await;

        assert!(h.relay.session_for("ana").await.is_none());
        assert!(h.relay.session_for("luis").await.is_none());
        assert_eq!(h.relay.online_count().await, 0);

        let mut offline: Vec<String> = drain(&mut rx_b)
            .into_iter()
            .map(|event| match event {
                ServerEvent::PartnerOffline { user_id } => user_id,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        offline.sort();
        assert_eq!(offline, vec!["ana".to_string(), "luis".to_string()]);

        let actions = h.finish().await;
        assert_eq!(
            actions[..2],
            [
                ("ana".to_string(), ConnectionAction::Connected),
                ("luis".to_string(), ConnectionAction::Connected),
            ]
        );
        let mut disconnected = actions[2..].to_vec();
        disconnected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            disconnected,
            vec![
                ("ana".to_string(), ConnectionAction::Disconnected),
                ("luis".to_string(), ConnectionAction::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_lone_disconnect_reaches_nobody() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        h.relay.handle_signal(&a, join("ana")).await;

        h.relay.disconnect(&a.connection_id).await;

        assert_eq!(h.relay.connection_count().await, 0);
        assert_eq!(h.relay.online_count().await, 0);
    }

    #[tokio::test]
    async fn test_unmatched_disconnect_is_noop() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;

        // Never joined
        h.relay.disconnect(&a.connection_id).await;
        // Unknown connection entirely
        h.relay.disconnect(&Uuid::new_v4()).await;

        assert!(drain(&mut rx_b).is_empty());
        assert!(h.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_audio_reaches_partner_unchanged_and_not_sender() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect().await;
        let (b, mut rx_b) = h.connect().await;
        h.relay.handle_signal(&a, join("A")).await;
        h.relay.handle_signal(&b, join("B")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.relay
            .handle_signal(
                &a,
                ClientEvent::AudioStream {
                    user_id: Some("A".to_string()),
                    audio_data: Some(vec![0.1, 0.2, 0.3]),
                },
            )
            .await;

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::IncomingAudio {
                user_id: Some("A".to_string()),
                audio_data: Some(vec![0.1, 0.2, 0.3]),
            }]
        );
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_together_mode_handshake_order() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect().await;
        let (b, mut rx_b) = h.connect().await;

        h.relay
            .handle_signal(
                &a,
                ClientEvent::StartTogetherMode {
                    user_id: Some("A".into()),
                    username: Some("Ana".into()),
                },
            )
            .await;
        h.relay
            .handle_signal(&b, ClientEvent::AcceptTogetherMode { user_id: Some("B".into()) })
            .await;
        h.relay
            .handle_signal(&a, ClientEvent::EndTogetherMode { user_id: Some("A".into()) })
            .await;

        let to_b: Vec<&str> = drain(&mut rx_b).iter().map(ServerEvent::name).collect();
        let to_a: Vec<&str> = drain(&mut rx_a).iter().map(ServerEvent::name).collect();
        assert_eq!(to_b, vec!["together-mode-request", "together-mode-ended"]);
        assert_eq!(to_a, vec!["together-mode-accepted"]);
    }

    #[tokio::test]
    async fn test_duplicate_join_keeps_single_session() {
        let h = Harness::new();
        let (first, _rx1) = h.connect().await;
        let (second, _rx2) = h.connect().await;

        h.relay.handle_signal(&first, join("ana")).await;
        h.relay.handle_signal(&second, join("ana")).await;

        assert_eq!(h.relay.online_count().await, 1);
        let session = h.relay.session_for("ana").await.unwrap();
        assert_eq!(session.connection_id, second.connection_id);

        // The superseded connection closing must not take the user offline
        h.relay.disconnect(&first.connection_id).await;
        assert!(h.relay.session_for("ana").await.is_some());

        h.relay.disconnect(&second.connection_id).await;
        assert_eq!(h.relay.online_count().await, 0);

        assert_eq!(
            h.finish().await,
            vec![
                ("ana".to_string(), ConnectionAction::Connected),
                ("ana".to_string(), ConnectionAction::Connected),
                ("ana".to_string(), ConnectionAction::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_fans_out_to_n_minus_one() {
        let h = Harness::new();
        let mut conns = Vec::new();
        for _ in 0..5 {
            conns.push(h.connect().await);
        }

        let (sender, _) = &conns[0];
        let recipients = h
            .relay
            .relay(
                sender,
                ClientEvent::Typing {
                    user_id: Some("ana".into()),
                    username: Some("Ana".into()),
                },
            )
            .await;
        assert_eq!(recipients, 4);

        for (i, (_, rx)) in conns.iter_mut().enumerate() {
            let received = drain(rx).len();
            assert_eq!(received, if i == 0 { 0 } else { 1 });
        }
    }

    #[tokio::test]
    async fn test_check_sunset_reaches_every_connection() {
        let h = Harness::new();
        let mut conns = Vec::new();
        for _ in 0..3 {
            conns.push(h.connect().await);
        }
        // A connection in another pairing room still gets the reminder
        let (moved, _) = &conns[2];
        h.relay
            .handle_signal(
                moved,
                ClientEvent::Join {
                    user_id: Some("sol".into()),
                    username: None,
                    pair_id: Some("pair-b".into()),
                },
            )
            .await;

        assert_eq!(h.relay.check_sunset().await, 3);
        for (_, rx) in conns.iter_mut() {
            assert!(drain(rx).contains(&ServerEvent::CheckSunset));
        }
    }

    #[tokio::test]
    async fn test_pair_id_scopes_broadcasts() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (b, mut rx_b) = h.connect().await;
        let (c, mut rx_c) = h.connect().await;

        for (conn, user, pair) in [(&a, "ana", "p1"), (&b, "luis", "p1"), (&c, "sol", "p2")] {
            h.relay
                .handle_signal(
                    conn,
                    ClientEvent::Join {
                        user_id: Some(user.into()),
                        username: None,
                        pair_id: Some(pair.into()),
                    },
                )
                .await;
        }
        drain(&mut rx_b);
        drain(&mut rx_c);

        h.relay
            .handle_signal(
                &a,
                ClientEvent::SunsetTime {
                    user_id: Some("ana".into()),
                    sunset_time: Some("19:42".into()),
                },
            )
            .await;

        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
        assert_eq!(h.relay.session_for("ana").await.unwrap().room, "p1");
    }

    #[tokio::test]
    async fn test_join_without_user_id_is_ignored() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;

        h.relay
            .handle_signal(
                &a,
                ClientEvent::Join {
                    user_id: None,
                    username: Some("Ana".into()),
                    pair_id: None,
                },
            )
            .await;

        assert_eq!(h.relay.online_count().await, 0);
        assert!(drain(&mut rx_b).is_empty());
        assert!(h.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_signals_before_join_are_still_relayed() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let (_b, mut rx_b) = h.connect().await;

        let recipients = h
            .relay
            .relay(&a, ClientEvent::NewVoiceMessage { user_id: Some("ana".into()), duration: Some(4.2) })
            .await;

        assert_eq!(recipients, 1);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::VoiceMessageReceived {
                user_id: Some("ana".into()),
                duration: Some(4.2),
            }]
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let h = Harness::new();
        let (a, _rx) = h.connect().await;
        h.relay.handle_signal(&a, join("ana")).await;

        let stats = h.relay.get_stats().await;
        assert_eq!(
            stats,
            RelayStats {
                active_connections: 1,
                online_users: 1,
                active_rooms: 1,
            }
        );
        assert_eq!(h.relay.presence_snapshot().await.len(), 1);
    }
}
