//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::RelayState;

/// State shared by every route handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub relay: RelayState,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: PgPool,
        relay: RelayState,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            relay,
            shutdown,
        }
    }
}
