//! Route synthesis: one router per exposed model, the session routes, common routes and the
//! OpenAPI document, all mounted under the configured base path.

mod common;
mod entity;
mod session;

pub use common::common_routes;
pub use entity::model_routes;
pub use session::session_routes;

use crate::config::validate;
use crate::error::{ApiError, ConfigError};
use crate::registrar::openapi::{self, ApiDoc};
use crate::registrar::{register, session_namespace, Namespace};
use crate::state::{AppState, ModelState};
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

async fn not_found() -> ApiError {
    ApiError::NotFound("The requested URL was not found on the server.".into())
}

/// Build the whole API for `state.module`. Fails on an invalid module or a model whose schemas
/// cannot be generated.
pub fn autoconfigure(state: AppState) -> Result<Router, ConfigError> {
    validate(&state.module)?;
    let mut app = Router::new();
    let mut doc = ApiDoc::default();

    for model in state.module.exposed() {
        let exposure = model.exposure()?;
        if !exposure.auto_api_endpoints {
            tracing::debug!(model = %model.name, "automatic endpoints disabled");
            continue;
        }
        let alias = exposure.endpoint_alias.clone();
        let mut ns = Namespace::new(alias.clone());
        let Some(schemas) = register(&mut ns, &state.module, model, &alias, &[])? else {
            continue;
        };
        for custom in &exposure.custom_endpoints {
            let target = state.module.get(&custom.target).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: custom.target.clone(),
            })?;
            let target_alias = target.exposure()?.endpoint_alias.clone();
            register(&mut ns, &state.module, target, &target_alias, &[])?;
        }
        let namespace = Arc::new(ns);
        let (router, operations) = model_routes(ModelState {
            app: state.clone(),
            model: Arc::new(model.clone()),
            namespace: namespace.clone(),
            schemas,
        })?;
        app = app.merge(router);
        doc.operations.extend(operations);
        doc.namespaces.push(namespace.as_ref().clone());
        tracing::info!(model = %model.name, alias = %alias, "exposed model");
    }

    let (router, operations) = session_routes(state.clone())?;
    app = app.merge(router);
    doc.operations.extend(operations);
    doc.namespaces.push(session_namespace());

    let openapi = Arc::new(openapi::build(&doc, &state.settings));
    app = app.merge(common_routes(state.clone(), openapi));

    Ok(app
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.settings.body_limit_bytes)))
}
