//! Raw per-model exposure overrides, as declared by the model author.

use crate::link::LinkTemplate;
use crate::store::ListQuery;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Builds the query behind a custom endpoint from its path and query-string arguments.
/// `_page`, `_pagelength` and `_session` are removed before the call; pagination is applied afterwards.
pub type QueryBuilder = fn(&BTreeMap<String, String>) -> Result<ListQuery, String>;

/// Author-declared read-only list endpoint served at `/{alias}/{name}`.
#[derive(Clone, Debug)]
pub struct CustomEndpoint {
    pub name: String,
    pub doc: String,
    /// Model whose records the query returns.
    pub target: String,
    pub build: QueryBuilder,
}

impl CustomEndpoint {
    pub fn new(name: impl Into<String>, target: impl Into<String>, doc: impl Into<String>, build: QueryBuilder) -> Self {
        CustomEndpoint {
            name: name.into(),
            doc: doc.into(),
            target: target.into(),
            build,
        }
    }
}

/// Partial exposure config. Anything left unset falls back to the defaults in
/// [`ExposureConfig::defaults`](crate::config::ExposureConfig::defaults).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureOverrides {
    #[serde(default)]
    pub auto_api_endpoints: Option<bool>,
    #[serde(default)]
    pub endpoint_alias: Option<String>,
    /// May contain `:param` segments, e.g. `parent/:parent_id`.
    #[serde(default)]
    pub url_prefix: Option<String>,
    /// Added to the default read-only set.
    #[serde(default)]
    pub read_only_fields: Vec<String>,
    /// Query-string alias -> to-one relation field.
    #[serde(default)]
    pub queryable_relations: Option<BTreeMap<String, String>>,
    /// Added to the default links.
    #[serde(default)]
    pub links: Vec<LinkTemplate>,
    #[serde(skip)]
    pub custom_endpoints: Option<Vec<CustomEndpoint>>,
}

impl ExposureOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.endpoint_alias = Some(alias.into());
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    pub fn manual_routes(mut self) -> Self {
        self.auto_api_endpoints = Some(false);
        self
    }

    pub fn read_only(mut self, field: impl Into<String>) -> Self {
        self.read_only_fields.push(field.into());
        self
    }

    pub fn queryable(mut self, alias: impl Into<String>, relation: impl Into<String>) -> Self {
        self.queryable_relations
            .get_or_insert_with(BTreeMap::new)
            .insert(alias.into(), relation.into());
        self
    }

    pub fn link(mut self, link: LinkTemplate) -> Self {
        self.links.push(link);
        self
    }

    pub fn custom_endpoint(mut self, endpoint: CustomEndpoint) -> Self {
        self.custom_endpoints.get_or_insert_with(Vec::new).push(endpoint);
        self
    }
}
