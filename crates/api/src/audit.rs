//! Connection audit logging
//!
//! Connect/disconnect events are appended to the `connection_logs` table
//! through a write-behind queue so a slow database never delays relaying.
//! Audit delivery is best-effort: a full queue or a failed insert is logged
//! and the record is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use pedacito_shared::{ConnectionAction, ConnectionAuditRecord, PedacitoError};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Append-only destination for connection audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &ConnectionAuditRecord) -> Result<(), PedacitoError>;
}

/// Postgres-backed audit sink writing to `connection_logs`
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, record: &ConnectionAuditRecord) -> Result<(), PedacitoError> {
        sqlx::query(
            r#"
            INSERT INTO connection_logs (user_id, action, "timestamp")
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&record.user_id)
        .bind(record.action.as_str())
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Handle to the write-behind audit queue.
///
/// Cloning is cheap. The writer task exits once every handle is dropped and
/// the queue has been drained.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<ConnectionAuditRecord>,
}

impl AuditLog {
    /// Spawn the writer task draining into `sink`
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ConnectionAuditRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.append(&record).await {
                    tracing::error!(
                        error = %e,
                        user_id = %record.user_id,
                        action = %record.action,
                        "Failed to write connection audit record"
                    );
                }
            }
            tracing::debug!("Audit writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a record stamped with the current time. Never waits.
    pub fn record(&self, user_id: &str, action: ConnectionAction) {
        let record = ConnectionAuditRecord::now(user_id, action);
        if let Err(e) = self.tx.try_send(record) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            tracing::warn!(
                user_id = %user_id,
                action = %action,
                reason,
                "Dropped connection audit record"
            );
        }
    }
}

/// Latest audit entry for a user, if any
pub async fn latest_connection_event(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<ConnectionAuditRecord>, PedacitoError> {
    #[derive(sqlx::FromRow)]
    struct LogRow {
        user_id: String,
        action: String,
        timestamp: OffsetDateTime,
    }

    let row = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT user_id, action, "timestamp"
        FROM connection_logs
        WHERE user_id = $1
        ORDER BY "timestamp" DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<ConnectionAuditRecord, PedacitoError> {
        Ok(ConnectionAuditRecord {
            user_id: r.user_id,
            // The column is CHECK-constrained, so a bad value means a corrupt row
            action: r
                .action
                .parse::<ConnectionAction>()
                .map_err(|e| PedacitoError::Storage(e.to_string()))?,
            timestamp: r.timestamp,
        })
    })
    .transpose()
}
