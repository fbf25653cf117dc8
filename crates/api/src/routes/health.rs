//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::state::AppState;
use crate::websocket::RelayStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    fn status_code(self) -> StatusCode {
        match self {
            Self::Healthy => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub database: HealthStatus,
    pub relay: RelayStats,
}

async fn database_status(pool: &PgPool) -> HealthStatus {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => HealthStatus::Healthy,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: database unreachable");
            HealthStatus::Unhealthy
        }
    }
}

/// Health check endpoint
///
/// The relay itself has no failure state, so overall health follows the
/// audit database.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_status(&state.pool).await;

    (
        database.status_code(),
        Json(HealthResponse {
            status: database,
            version: env!("CARGO_PKG_VERSION"),
            database,
            relay: state.relay.get_stats().await,
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the audit database is reachable and the server is not
/// shutting down
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    database_status(&state.pool).await.status_code()
}
