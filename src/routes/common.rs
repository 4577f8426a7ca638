//! Common routes: health, readiness, version, OpenAPI document.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::openapi::OpenApi;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'static str>,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready(State(state): State<AppState>) -> Result<Json<ReadyBody>, (StatusCode, Json<ReadyBody>)> {
    if let Err(e) = state.store.ping().await {
        tracing::warn!(error = %e, "readiness check failed");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                database: Some("unavailable"),
            }),
        ));
    }
    Ok(Json(ReadyBody {
        status: "ok",
        database: Some("ok"),
    }))
}

async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.settings.title,
        "version": state.settings.version,
    }))
}

/// GET {base}/health, {base}/ready, {base}/version and {base}/openapi.json.
pub fn common_routes(state: AppState, openapi: Arc<OpenApi>) -> Router {
    let base = state.settings.mount_path().to_string();
    Router::new()
        .route(&format!("{}/health", base), get(health))
        .route(&format!("{}/ready", base), get(ready))
        .route(&format!("{}/version", base), get(version))
        .route(
            &format!("{}/openapi.json", base),
            get(move || {
                let doc = openapi.clone();
                async move { Json(doc.as_ref().clone()) }
            }),
        )
        .with_state(state)
}
