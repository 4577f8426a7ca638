//! Per-model routes synthesized from the exposure config, plus their OpenAPI operations.
//! Paths come from the module-wide [`RouteTable`](crate::link::RouteTable), so URL prefix
//! parameters reach handlers through `Path`.

use crate::error::ConfigError;
use crate::handlers::{create, custom_list, delete as delete_handler, list, list_detailed, read, update};
use crate::link::path_params;
use crate::registrar::openapi::{OperationDoc, ParamDoc};
use crate::registrar::BASE_PAGINATED;
use crate::service::query;
use crate::state::{CustomState, ModelState};
use axum::{http::Method, routing::get, Router};
use std::sync::Arc;

fn route_path(state: &ModelState, suffix: &str) -> Result<String, ConfigError> {
    let endpoint = format!("{}-{}", state.alias(), suffix);
    state
        .app
        .routes
        .path(&endpoint)
        .map(str::to_string)
        .ok_or(ConfigError::MissingReference { kind: "endpoint", id: endpoint })
}

fn with_path_params(mut op: OperationDoc, path: &str) -> OperationDoc {
    for param in path_params(path) {
        op = op.param(ParamDoc::path(param));
    }
    op
}

fn page_params(op: OperationDoc) -> OperationDoc {
    op.param(ParamDoc::query(query::PAGE, "(Optional) Results page to view. Default 1"))
        .param(ParamDoc::query(
            query::PAGE_LENGTH,
            "(Optional) Number of results to display per page. Default 100, maximum 1000",
        ))
        .param(session_param())
}

fn session_param() -> ParamDoc {
    ParamDoc::query(query::SESSION, "(Optional) DB session to add changes to")
}

/// Router and documentation for one exposed model.
pub fn model_routes(state: ModelState) -> Result<(Router, Vec<OperationDoc>), ConfigError> {
    let alias = state.alias().to_string();
    let schemas = state.schemas.clone();
    let list_path = route_path(&state, "list")?;
    let detailed_path = route_path(&state, "list-detailed")?;
    let one_path = route_path(&state, "one")?;

    let mut docs = vec![
        page_params(with_path_params(
            OperationDoc::new(&list_path, Method::GET, &alias, format!("{}-list", alias)),
            &list_path,
        ))
        .summary(format!("List {} records", alias))
        .response(200, BASE_PAGINATED, "Paginated record links")
        .bad_request("Invalid pagination or filter parameter"),
        with_path_params(
            OperationDoc::new(&list_path, Method::POST, &alias, format!("{}-create", alias)),
            &list_path,
        )
        .param(session_param())
        .summary(format!("Create a {} record", alias))
        .request(&schemas.payload)
        .response(201, &schemas.response, "Created"),
        page_params(with_path_params(
            OperationDoc::new(&detailed_path, Method::GET, &alias, format!("{}-list-detailed", alias)),
            &detailed_path,
        ))
        .param(ParamDoc::query(query::SORT_BY, "(Optional) Attribute to sort by. Default id"))
        .param(ParamDoc::query(query::SEARCH, "(Optional) Case-insensitive text search across all fields"))
        .summary(format!("List {} records in full", alias))
        .response(200, &schemas.detailed, "Paginated records")
        .bad_request("Invalid pagination, sort or filter parameter"),
    ];
    for (method, op_id, summary, description) in [
        (Method::GET, "read", "Retrieve", "Record"),
        (Method::POST, "update", "Update", "Updated"),
        (Method::DELETE, "delete", "Delete", "Deleted record"),
    ] {
        let mut op = with_path_params(
            OperationDoc::new(&one_path, method.clone(), &alias, format!("{}-{}", alias, op_id)),
            &one_path,
        )
        .param(session_param())
        .summary(format!("{} a {} record", summary, alias))
        .response(200, &schemas.response, description);
        if method == Method::POST {
            op = op.request(&schemas.payload);
        }
        docs.push(op);
    }

    let mut router = Router::new()
        .route(&list_path, get(list).post(create))
        .route(&detailed_path, get(list_detailed))
        .route(&one_path, get(read).post(update).delete(delete_handler))
        .with_state(state.clone());

    let exposure = state.exposure()?.clone();
    for endpoint in exposure.custom_endpoints {
        let path = route_path(&state, &endpoint.name)?;
        let target = state
            .app
            .module
            .get(&endpoint.target)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: endpoint.target.clone(),
            })?;
        let target_schema = target.exposure()?.endpoint_alias.clone();
        docs.push(
            page_params(with_path_params(
                OperationDoc::new(&path, Method::GET, &alias, format!("{}-{}", alias, endpoint.name)),
                &path,
            ))
            .summary(endpoint.doc.clone())
            .response(200, format!("{}-detailed", target_schema), "Paginated records")
            .bad_request("Filter invalid"),
        );
        let custom = CustomState {
            owner: state.clone(),
            endpoint,
            target: Arc::new(target.clone()),
            target_schema,
        };
        router = router.merge(Router::new().route(&path, get(custom_list)).with_state(custom));
    }
    tracing::debug!(alias = %alias, operations = docs.len(), "synthesized model routes");
    Ok((router, docs))
}
