//! Query-string parsing for list endpoints.

use crate::config::ApiSettings;
use crate::error::ApiError;
use crate::model::{FieldType, ModelDef};
use crate::store::ListQuery;
use std::collections::BTreeMap;

pub const PAGE: &str = "_page";
pub const PAGE_LENGTH: &str = "_pagelength";
pub const SORT_BY: &str = "_sortby";
pub const SORT_ASC: &str = "_sort_asc";
pub const SEARCH: &str = "_query";
pub const SESSION: &str = "_session";

const BAD_PAGINATION: &str =
    "Invalid pagination parameter! `_page` and `_pagelength` (if provided) must be integers.";

/// Parsed list request: the store query plus the client's session id, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct ListParams {
    pub query: ListQuery,
    pub session: Option<String>,
}

/// Pops `_page` and `_pagelength` from `args`, capping the page length at the configured maximum.
pub fn take_pagination(args: &mut BTreeMap<String, String>, settings: &ApiSettings) -> Result<(u64, u64), ApiError> {
    let parse = |raw: Option<String>, default: u64| -> Result<u64, ApiError> {
        match raw {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ApiError::validation(BAD_PAGINATION)),
        }
    };
    let page = parse(args.remove(PAGE), 1)?;
    let page_length = parse(args.remove(PAGE_LENGTH), settings.default_page_length)?.min(settings.max_page_size);
    Ok((page, page_length))
}

/// Build the list query for `model` from `defaults` (URL prefix parameters) overlaid with the
/// request's query-string `args`. Unknown filter keys are reported together.
pub fn parse_list_params(
    model: &ModelDef,
    defaults: &BTreeMap<String, String>,
    args: &BTreeMap<String, String>,
    settings: &ApiSettings,
) -> Result<ListParams, ApiError> {
    let mut args: BTreeMap<String, String> = defaults.iter().chain(args.iter()).map(|(k, v)| (k.clone(), v.clone())).collect();
    let (page, page_length) = take_pagination(&mut args, settings)?;
    let sort_by = args.remove(SORT_BY).unwrap_or_else(|| "id".to_string());
    if !model.is_sortable(&sort_by) {
        return Err(ApiError::validation(format!(
            "Invalid sort-by parameter! `{}` is not a valid model attribute.",
            sort_by
        )));
    }
    args.remove(SORT_ASC);
    let search = args.remove(SEARCH).filter(|s| !s.is_empty());
    let session = args.remove(SESSION).filter(|s| !s.is_empty());

    let mut query = ListQuery {
        sort_by,
        page,
        page_length,
        search,
        ..ListQuery::default()
    };
    let mut errors = Vec::new();
    for (key, raw) in &args {
        match filter_column(model, key) {
            Some((column, ty)) => match ty.parse_text(raw) {
                Ok(value) => query.filters.push((column, value)),
                Err(e) => errors.push(format!("Invalid value for `{}`: {}", key, e)),
            },
            None => errors.push(format!("Attribute `{}` not found", key)),
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(ListParams { query, session })
}

/// Stored column and value type behind a filter key: `id`, a queryable relation alias, a scalar
/// field, a to-one relation field or its foreign-key column.
fn filter_column(model: &ModelDef, key: &str) -> Option<(String, FieldType)> {
    if key == "id" {
        return Some(("id".into(), FieldType::Integer));
    }
    let relation = model
        .exposure
        .as_ref()
        .and_then(|e| e.queryable_relations.get(key))
        .map(String::as_str);
    let name = relation.unwrap_or(key);
    if let Some(field) = model.find_field(name) {
        return match &field.ty {
            FieldType::Nested { foreign_key, .. } => Some((foreign_key.clone(), FieldType::Integer)),
            FieldType::ToMany { .. } => None,
            ty => Some((field.name.clone(), ty.clone())),
        };
    }
    model.fields.iter().find_map(|f| match &f.ty {
        FieldType::Nested { foreign_key, .. } if foreign_key == key => Some((foreign_key.clone(), FieldType::Integer)),
        _ => None,
    })
}
