//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // CORS
    pub frontend_url: String,
    pub cors_allowed_origins: Vec<String>,

    // Relay
    pub sunset_check_interval_secs: u64,
    pub ws_ping_interval_secs: u64,
    pub ws_idle_timeout_secs: u64, // 0 disables idle eviction
    pub ws_outbound_queue_capacity: usize,
    pub audit_queue_capacity: usize,
    pub default_room: String,

    // Logging
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_address = match env::var("BIND_ADDRESS") {
            Ok(addr) => addr,
            Err(_) => {
                let port: u16 = parse_var("PORT", 5000)?;
                format!("0.0.0.0:{}", port)
            }
        };

        let default_room = env::var("RELAY_DEFAULT_ROOM").unwrap_or_else(|_| "couple".to_string());
        if default_room.trim().is_empty() {
            return Err(ConfigError::Invalid("RELAY_DEFAULT_ROOM", "must not be empty"));
        }

        let log_json = match env::var("LOG_FORMAT") {
            Ok(format) => match format.to_lowercase().as_str() {
                "json" => true,
                "pretty" | "text" => false,
                _ => return Err(ConfigError::Invalid("LOG_FORMAT", "expected json or pretty")),
            },
            Err(_) => false,
        };

        Ok(Self {
            bind_address,

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: positive("DATABASE_MAX_CONNECTIONS", 5)?,

            // CORS
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),

            // Relay
            sunset_check_interval_secs: positive("SUNSET_CHECK_INTERVAL_SECS", 3600)?,
            ws_ping_interval_secs: positive("WS_PING_INTERVAL_SECS", 25)?,
            ws_idle_timeout_secs: parse_var("WS_IDLE_TIMEOUT_SECS", 60)?,
            ws_outbound_queue_capacity: positive("WS_OUTBOUND_QUEUE_CAPACITY", 256)?,
            audit_queue_capacity: positive("AUDIT_QUEUE_CAPACITY", 1024)?,
            default_room,

            log_json,
        })
    }

    pub fn sunset_check_interval(&self) -> Duration {
        Duration::from_secs(self.sunset_check_interval_secs)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_secs)
    }

    /// Idle timeout for a WebSocket connection, `None` when eviction is disabled
    pub fn ws_idle_timeout(&self) -> Option<Duration> {
        (self.ws_idle_timeout_secs > 0).then(|| Duration::from_secs(self.ws_idle_timeout_secs))
    }

    /// Whether a browser `Origin` header is allowed by the CORS policy.
    ///
    /// `FRONTEND_URL` always matches exactly. Entries in `CORS_ALLOWED_ORIGINS`
    /// may contain one `*`, which matches any run of characters (used for
    /// preview deployments such as `https://*--site.netlify.app`).
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if origin == self.frontend_url {
            return true;
        }

        self.cors_allowed_origins.iter().any(|allowed| match allowed.split_once('*') {
            Some((prefix, suffix)) => {
                origin.len() >= prefix.len() + suffix.len()
                    && origin.starts_with(prefix)
                    && origin.ends_with(suffix)
            }
            None => allowed == origin,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "not a valid number")),
        Err(_) => Ok(default),
    }
}

fn positive<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_var(name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
