//! Common types used across Mi Pedacito

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PedacitoError;

// =============================================================================
// Connection Audit
// =============================================================================

/// Lifecycle action recorded in the connection audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionAction {
    Connected,
    Disconnected,
}

impl ConnectionAction {
    /// Value stored in the `connection_logs.action` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionAction {
    type Err = PedacitoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            _ => Err(PedacitoError::Validation(format!(
                "Invalid connection action: {}",
                s
            ))),
        }
    }
}

/// One append-only row of the connection audit log.
///
/// Written once per `join` and once per matched disconnect; never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAuditRecord {
    pub user_id: String,
    pub action: ConnectionAction,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ConnectionAuditRecord {
    /// Build a record stamped with the current UTC time
    pub fn now(user_id: impl Into<String>, action: ConnectionAction) -> Self {
        Self {
            user_id: user_id.into(),
            action,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_action_round_trips_through_str() {
        for action in [ConnectionAction::Connected, ConnectionAction::Disconnected] {
            let parsed: ConnectionAction = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn test_connection_action_parse_is_case_insensitive() {
        assert_eq!(
            "CONNECTED".parse::<ConnectionAction>().unwrap(),
            ConnectionAction::Connected
        );
    }

    #[test]
    fn test_connection_action_rejects_unknown() {
        let err = "away".parse::<ConnectionAction>().unwrap_err();
        assert!(matches!(err, PedacitoError::Validation(_)));
    }

    #[test]
    fn test_audit_record_serializes_camel_case() {
        let record = ConnectionAuditRecord {
            user_id: "64f1c0ffee".to_string(),
            action: ConnectionAction::Disconnected,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userId"], "64f1c0ffee");
        assert_eq!(json["action"], "disconnected");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
