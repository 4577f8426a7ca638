//! Session routes: new, save, rollback.

use crate::error::ConfigError;
use crate::handlers::{new_session, rollback, save};
use crate::registrar::openapi::{OperationDoc, ParamDoc};
use crate::state::AppState;
use axum::{http::Method, routing::get, Router};

const TAG: &str = "session";

fn path(state: &AppState, endpoint: &str) -> Result<String, ConfigError> {
    state
        .routes
        .path(endpoint)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingReference {
            kind: "endpoint",
            id: endpoint.to_string(),
        })
}

pub fn session_routes(state: AppState) -> Result<(Router, Vec<OperationDoc>), ConfigError> {
    let new_path = path(&state, "session-new")?;
    let save_path = path(&state, "session-save")?;
    let rollback_path = path(&state, "session-rollback")?;
    let docs = vec![
        OperationDoc::new(&new_path, Method::GET, TAG, "session-new")
            .summary("Start a DB session")
            .response(200, "session-response", "Session started"),
        OperationDoc::new(&save_path, Method::GET, TAG, "session-save")
            .summary("Commit and close a DB session")
            .param(ParamDoc::path("id"))
            .response(200, "session-action-response", "Committed actions"),
        OperationDoc::new(&rollback_path, Method::GET, TAG, "session-rollback")
            .summary("Roll back a DB session")
            .param(ParamDoc::path("id"))
            .param(ParamDoc::query("close", "(Optional) `n` keeps the session open. Default y"))
            .response(200, "session-action-response", "Rolled-back actions"),
    ];
    let router = Router::new()
        .route(&new_path, get(new_session))
        .route(&save_path, get(save))
        .route(&rollback_path, get(rollback))
        .with_state(state);
    Ok((router, docs))
}
