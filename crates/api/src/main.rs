//! Mi Pedacito relay server entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pedacito_api::{
    audit::{AuditLog, PgAuditSink},
    housekeeping::spawn_sunset_ticker,
    routes::create_router,
    websocket::RelayState,
    AppState, Config, ShutdownCoordinator,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for open sockets to run their disconnect path
const SOCKET_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for queued audit records to reach the database
const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    let pool = pedacito_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    pedacito_shared::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Connected to database");

    let (audit, audit_writer) = AuditLog::spawn(
        Arc::new(PgAuditSink::new(pool.clone())),
        config.audit_queue_capacity,
    );
    let relay = RelayState::new(audit, config.default_room.clone());
    let ticker = spawn_sunset_ticker(relay.clone(), config.sunset_check_interval());

    let bind_address = config.bind_address.clone();
    tracing::info!(
        frontend_url = %config.frontend_url,
        default_room = %config.default_room,
        "Relay configured"
    );

    let shutdown = ShutdownCoordinator::new();
    let app = create_router(AppState::new(config, pool.clone(), relay, shutdown.clone()));

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Relay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    // Sockets and the ticker hold the remaining relay handles; once they are
    // gone the audit writer drains its queue and exits.
    shutdown.wait_for_sockets(SOCKET_DRAIN_TIMEOUT).await;
    ticker.abort();
    let _ = ticker.await;
    match tokio::time::timeout(AUDIT_FLUSH_TIMEOUT, audit_writer).await {
        Ok(_) => tracing::info!("Audit log flushed"),
        Err(_) => tracing::warn!("Timed out flushing audit log"),
    }

    pool.close().await;
    tracing::info!("Relay server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pedacito_api=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal(shutdown: ShutdownCoordinator) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }

    shutdown.shutdown();
}
