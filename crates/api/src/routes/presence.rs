//! Read-only presence queries
//!
//! Combines the relay's in-memory session with the newest connection audit
//! record so a client can show "online" or "last seen" for its partner.

use axum::{
    extract::{Path, State},
    Json,
};
use pedacito_shared::ConnectionAction;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    audit::latest_connection_event,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Longest user id accepted by the presence lookup
const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub online_since: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ConnectionAction>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub last_action_at: Option<OffsetDateTime>,
}

/// `GET /api/presence/:user_id`
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<PresenceResponse>> {
    if user_id.trim().is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(ApiError::BadRequest("Invalid user id".to_string()));
    }

    let session = state.relay.session_for(&user_id).await;
    let last = latest_connection_event(&state.pool, &user_id).await?;

    if session.is_none() && last.is_none() {
        return Err(ApiError::NotFound);
    }

    Ok(Json(PresenceResponse {
        user_id,
        online: session.is_some(),
        username: session.as_ref().and_then(|s| s.display_name.clone()),
        online_since: session.as_ref().map(|s| s.joined_at),
        last_action: last.as_ref().map(|r| r.action),
        last_action_at: last.as_ref().map(|r| r.timestamp),
    }))
}
