//! Author-declared read-only list endpoints.

use crate::error::ApiError;
use crate::extractors::{AccessLevel, Credential};
use crate::response::{wrap_page, Pagination};
use crate::service::{query, take_pagination, CrudService};
use crate::state::CustomState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// GET `/{alias}/{name}`: the endpoint's query over its target model, paginated like any list.
pub async fn custom_list(
    State(state): State<CustomState>,
    credential: Credential,
    Path(path): Path<BTreeMap<String, String>>,
    Query(args): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Viewer)?;
    let app = &state.owner.app;
    let mut args: BTreeMap<String, String> = path.iter().chain(args.iter()).map(|(k, v)| (k.clone(), v.clone())).collect();
    let (page, page_length) = take_pagination(&mut args, &app.settings)?;
    let session = args.remove(query::SESSION).filter(|s| !s.is_empty());
    tracing::debug!(endpoint = %state.endpoint.name, alias = %state.owner.alias(), ?args, "custom list");

    let mut list = (state.endpoint.build)(&args).map_err(ApiError::validation)?;
    list.page = page;
    list.page_length = page_length;
    let result = CrudService::list(&app.sessions, &app.module, &state.target, list, session.as_deref()).await?;

    let target_exposure = state.target.exposure()?;
    let items: Vec<Value> = result
        .records
        .iter()
        .map(|record| {
            let mut view = state.target.to_json_view(record);
            let links = target_exposure
                .links
                .iter()
                .map(|link| link.finalize(&app.routes, &target_exposure.endpoint_alias, record, &BTreeMap::new()))
                .collect();
            view.insert("_links".into(), Value::Array(links));
            state.owner.namespace.marshal(&state.target_schema, &Value::Object(view))
        })
        .collect();
    let pagination = Pagination::new(page, page_length, result.total);
    let message = format!(
        "Successfully retrieved page ({}/{}) of {} data",
        pagination.page, pagination.total_pages, state.endpoint.name
    );
    Ok(wrap_page(items, pagination, message, session))
}
