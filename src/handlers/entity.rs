//! Generated per-model handlers: list, detailed list, create, read, update, delete.

use crate::error::ApiError;
use crate::extractors::{AccessLevel, Credential};
use crate::link::LinkTemplate;
use crate::model::Record;
use crate::registrar::RECORD_BASE;
use crate::response::{wrap_page, wrap_result, Pagination};
use crate::service::{parse_list_params, query, CrudService, RequestValidator};
use crate::state::ModelState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Full JSON view of `record` with its finalized links, shaped by the model's wire schema.
pub(crate) fn record_json(state: &ModelState, record: &Record, extra: &BTreeMap<String, String>) -> Result<Value, ApiError> {
    let exposure = state.exposure()?;
    let mut view = state.model.to_json_view(record);
    let links = exposure
        .links
        .iter()
        .map(|link| link.finalize(&state.app.routes, state.alias(), record, extra))
        .collect();
    view.insert("_links".into(), Value::Array(links));
    Ok(state.namespace.marshal(state.alias(), &Value::Object(view)))
}

fn list_item(state: &ModelState, record: &Record, extra: &BTreeMap<String, String>) -> Value {
    let link = LinkTemplate::view_record().finalize(&state.app.routes, state.alias(), record, extra);
    let item = json!({ "id": record.id, "_links": [link] });
    state.namespace.marshal(RECORD_BASE, &item)
}

/// Path segment ids that are not integers can never name a record.
fn parse_id(path: &mut BTreeMap<String, String>) -> Result<i64, ApiError> {
    let raw = path.remove("id").unwrap_or_default();
    raw.parse::<i64>()
        .map_err(|_| ApiError::NotFound(format!("Record with ID `{}` not found", raw)))
}

fn session_arg(args: &mut BTreeMap<String, String>) -> Option<String> {
    args.remove(query::SESSION).filter(|s| !s.is_empty())
}

fn page_message(pagination: &Pagination, alias: &str) -> String {
    format!(
        "Successfully retrieved page ({}/{}) of {} data",
        pagination.page, pagination.total_pages, alias
    )
}

/// GET `/{alias}/`: paginated list of record ids and their view links.
pub async fn list(
    State(state): State<ModelState>,
    credential: Credential,
    Path(path): Path<BTreeMap<String, String>>,
    Query(args): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Viewer)?;
    tracing::debug!(alias = %state.alias(), ?args, "list");
    let params = parse_list_params(&state.model, &path, &args, &state.app.settings)?;
    let page = CrudService::list(
        &state.app.sessions,
        &state.app.module,
        &state.model,
        params.query.clone(),
        params.session.as_deref(),
    )
    .await?;
    let items: Vec<Value> = page.records.iter().map(|r| list_item(&state, r, &path)).collect();
    let pagination = Pagination::new(params.query.page, params.query.page_length, page.total);
    let message = page_message(&pagination, state.alias());
    Ok(wrap_page(items, pagination, message, params.session))
}

/// GET `/{alias}/details`: paginated, filtered, sorted and searched full records.
pub async fn list_detailed(
    State(state): State<ModelState>,
    credential: Credential,
    Path(path): Path<BTreeMap<String, String>>,
    Query(args): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Viewer)?;
    tracing::debug!(alias = %state.alias(), ?args, "list detailed");
    let params = parse_list_params(&state.model, &path, &args, &state.app.settings)?;
    let page = CrudService::list(
        &state.app.sessions,
        &state.app.module,
        &state.model,
        params.query.clone(),
        params.session.as_deref(),
    )
    .await?;
    let items = page
        .records
        .iter()
        .map(|r| record_json(&state, r, &path))
        .collect::<Result<Vec<_>, _>>()?;
    let pagination = Pagination::new(params.query.page, params.query.page_length, page.total);
    let message = page_message(&pagination, state.alias());
    Ok(wrap_page(items, pagination, message, params.session))
}

fn write_payload(state: &ModelState, body: &Bytes, has_query: bool) -> Result<Map<String, Value>, ApiError> {
    let record = state
        .namespace
        .get(state.alias())
        .ok_or_else(|| ApiError::Internal(format!("Unexpected error occurred: no schema for {}", state.alias())))?;
    let payload = state
        .namespace
        .get(&state.schemas.payload)
        .ok_or_else(|| ApiError::Internal(format!("Unexpected error occurred: no schema for {}", state.schemas.payload)))?;
    RequestValidator::payload(record, payload, body, has_query)
}

/// POST `/{alias}/`: create a record from the JSON body.
pub async fn create(
    State(state): State<ModelState>,
    credential: Credential,
    Path(path): Path<BTreeMap<String, String>>,
    Query(mut args): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Editor)?;
    let session = session_arg(&mut args);
    tracing::debug!(alias = %state.alias(), session = ?session, "create");
    let payload = write_payload(&state, &body, !args.is_empty())?;
    let record = CrudService::create(
        &state.app.sessions,
        &state.app.module,
        &state.model,
        payload,
        session.as_deref(),
    )
    .await?;
    let message = format!(
        "Successfully created {} record {}",
        state.alias(),
        record.id.map_or_else(String::new, |id| id.to_string())
    );
    let result = record_json(&state, &record, &path)?;
    Ok(wrap_result(StatusCode::CREATED, result, message, session))
}

/// GET `/{alias}/:id`.
pub async fn read(
    State(state): State<ModelState>,
    credential: Credential,
    Path(mut path): Path<BTreeMap<String, String>>,
    Query(mut args): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Viewer)?;
    let id = parse_id(&mut path)?;
    let session = session_arg(&mut args);
    tracing::debug!(alias = %state.alias(), id, session = ?session, "read");
    let record = CrudService::fetch(&state.app.sessions, &state.app.module, &state.model, id, session.as_deref()).await?;
    let result = record_json(&state, &record, &path)?;
    let message = format!("Successfully retrieved {} record {}", state.alias(), id);
    Ok(wrap_result(StatusCode::OK, result, message, session))
}

/// POST `/{alias}/:id`: update the record from the JSON body.
pub async fn update(
    State(state): State<ModelState>,
    credential: Credential,
    Path(mut path): Path<BTreeMap<String, String>>,
    Query(mut args): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Editor)?;
    let id = parse_id(&mut path)?;
    let session = session_arg(&mut args);
    tracing::debug!(alias = %state.alias(), id, session = ?session, "update");
    let payload = write_payload(&state, &body, !args.is_empty())?;
    let record = CrudService::update(
        &state.app.sessions,
        &state.app.module,
        &state.model,
        id,
        payload,
        session.as_deref(),
    )
    .await?;
    let result = record_json(&state, &record, &path)?;
    let message = format!("Successfully updated {} record {}", state.alias(), id);
    Ok(wrap_result(StatusCode::OK, result, message, session))
}

/// DELETE `/{alias}/:id`: responds with the record as it was.
pub async fn delete(
    State(state): State<ModelState>,
    credential: Credential,
    Path(mut path): Path<BTreeMap<String, String>>,
    Query(mut args): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    credential.require(AccessLevel::Super)?;
    let id = parse_id(&mut path)?;
    let session = session_arg(&mut args);
    tracing::debug!(alias = %state.alias(), id, session = ?session, "delete");
    let record =
        CrudService::delete(&state.app.sessions, &state.app.module, &state.model, id, session.as_deref()).await?;
    let result = record_json(&state, &record, &path)?;
    let message = format!("Successfully deleted {} record {}", state.alias(), id);
    Ok(wrap_result(StatusCode::OK, result, message, session))
}
