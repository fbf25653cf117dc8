//! Error types for Mi Pedacito

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PedacitoError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for PedacitoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                PedacitoError::Unavailable(err.to_string())
            }
            _ => PedacitoError::Storage(err.to_string()),
        }
    }
}
