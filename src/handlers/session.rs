//! Session routes: start, commit and roll back client-held sessions.

use crate::error::ApiError;
use crate::extractors::{AccessLevel, Credential};
use crate::response::wrap_result;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

/// GET `/session/new`.
pub async fn new_session(State(state): State<AppState>, credential: Credential) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Editor)?;
    let lease = state.sessions.open(None).await?;
    tracing::info!(session = %lease.id, "client session started");
    let message = format!(
        "Successfully started new DB session. Cancelled after {} minutes of inactivity.",
        state.settings.session_timeout_minutes()
    );
    Ok(wrap_result(
        StatusCode::OK,
        json!({ "session_id": lease.id }),
        message,
        Some(lease.id.clone()),
    ))
}

/// GET `/session/save/:id`: commit and close.
pub async fn save(
    State(state): State<AppState>,
    credential: Credential,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Editor)?;
    tracing::debug!(session = %id, "save");
    let log = state.sessions.commit_and_close(&id).await?;
    let message = format!(
        "Successfully committed all objects in session {}. Session closed, actions recorded in `result`",
        id
    );
    Ok(wrap_result(StatusCode::OK, log.to_json(), message, Some(id)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RollbackParams {
    /// `n` keeps the session open; anything else closes it.
    pub close: Option<String>,
}

impl RollbackParams {
    fn close(&self) -> bool {
        !self.close.as_deref().is_some_and(|v| v.trim().eq_ignore_ascii_case("n"))
    }
}

/// GET `/session/rollback/:id?close=y|n`.
pub async fn rollback(
    State(state): State<AppState>,
    credential: Credential,
    Path(id): Path<String>,
    Query(params): Query<RollbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Editor)?;
    let close = params.close();
    tracing::debug!(session = %id, close, "rollback");
    let log = state.sessions.rollback(&id, close).await?;
    let message = format!(
        "Successfully rolled back all objects in DB session {}. Rolled-back actions recorded in `result`",
        id
    );
    let session = if close { None } else { Some(id) };
    Ok(wrap_result(StatusCode::OK, log.to_json(), message, session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_defaults_to_true() {
        assert!(RollbackParams::default().close());
        assert!(RollbackParams { close: Some("y".into()) }.close());
        assert!(!RollbackParams { close: Some("N".into()) }.close());
    }
}
