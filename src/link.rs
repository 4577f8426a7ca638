//! Hyperlinks between records and named routes.
//!
//! Every synthesized route is registered in a [`RouteTable`] under an endpoint name such as
//! `child-one` or `session-save`. A [`LinkTemplate`] names one of those endpoints and says which
//! record attributes fill which path parameters; [`LinkTemplate::finalize`] turns it into a
//! `{href, rel, method}` object for a concrete record.

use crate::config::{ApiSettings, ExposureConfig};
use crate::error::{ConfigError, LinkError};
use crate::model::{Record, SchemaModule};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

/// Placeholder replaced by the owning model's endpoint alias.
pub const ALIAS_PLACEHOLDER: &str = "{endpoint_alias}";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkTemplate {
    /// Endpoint name; may contain `{endpoint_alias}`.
    pub endpoint: String,
    /// Relation label shown to clients.
    pub rel: String,
    /// Advisory HTTP method.
    pub method: String,
    /// Route parameter -> record attribute.
    #[serde(default)]
    pub record_args: BTreeMap<String, String>,
}

impl LinkTemplate {
    pub fn new(endpoint: impl Into<String>, rel: impl Into<String>, method: impl Into<String>) -> Self {
        LinkTemplate {
            endpoint: endpoint.into(),
            rel: rel.into(),
            method: method.into(),
            record_args: BTreeMap::new(),
        }
    }

    /// Bind route parameter `param` to the record attribute `attribute`.
    pub fn bind(mut self, param: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.record_args.insert(param.into(), attribute.into());
        self
    }

    /// Link to the record's own GET route, used for list items.
    pub fn view_record() -> Self {
        LinkTemplate::new(format!("{}-one", ALIAS_PLACEHOLDER), "view record data", "GET").bind("id", "id")
    }

    /// Build the link for `record`. Record-bound arguments override `extra` arguments of the
    /// same name. Failures degrade to an error-describing link instead of an error.
    pub fn finalize(
        &self,
        routes: &RouteTable,
        alias: &str,
        record: &Record,
        extra: &BTreeMap<String, String>,
    ) -> Value {
        match self.resolve(routes, alias, record, extra) {
            Ok(href) => json!({
                "href": href,
                "rel": self.rel,
                "method": self.method,
            }),
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, rel = %self.rel, error = %e, "link generation failed");
                json!({
                    "href": format!("Error generating link: {}", e),
                    "rel": Value::Null,
                    "method": Value::Null,
                })
            }
        }
    }

    fn resolve(
        &self,
        routes: &RouteTable,
        alias: &str,
        record: &Record,
        extra: &BTreeMap<String, String>,
    ) -> Result<String, LinkError> {
        let endpoint = expand_endpoint(&self.endpoint, alias)?;
        let mut args = extra.clone();
        for (param, attribute) in &self.record_args {
            let value = record.attribute(attribute).ok_or_else(|| LinkError::MissingParameter {
                endpoint: endpoint.clone(),
                param: param.clone(),
            })?;
            args.insert(param.clone(), segment_value(&value));
        }
        routes.url_for(&endpoint, &args)
    }
}

fn expand_endpoint(template: &str, alias: &str) -> Result<String, LinkError> {
    let expanded = template.replace(ALIAS_PLACEHOLDER, alias);
    if let Some(start) = expanded.find('{') {
        let rest = expanded.get(start..).unwrap_or_default();
        let end = rest.find('}').map_or(rest.len(), |i| i + 1);
        return Err(LinkError::UnresolvedPlaceholder(rest.get(..end).unwrap_or(rest).to_string()));
    }
    Ok(expanded)
}

fn segment_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Endpoint name -> path template (axum `:param` syntax) for every synthesized route.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    paths: HashMap<String, String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all routes of an exposed module: list, detailed list, single record and custom
    /// endpoints per model, plus the session routes.
    pub fn build(module: &SchemaModule, settings: &ApiSettings) -> Result<Self, ConfigError> {
        let mut table = RouteTable::new();
        for model in module.exposed() {
            let exposure = model.exposure()?;
            if !exposure.auto_api_endpoints {
                continue;
            }
            let base = model_base_path(settings, exposure);
            let alias = &exposure.endpoint_alias;
            table.insert(format!("{}-list", alias), format!("{}/", base))?;
            table.insert(format!("{}-list-detailed", alias), format!("{}/details", base))?;
            table.insert(format!("{}-one", alias), format!("{}/:id", base))?;
            for custom in &exposure.custom_endpoints {
                table.insert(format!("{}-{}", alias, custom.name), format!("{}/{}", base, custom.name))?;
            }
        }
        let session = format!("{}/session", settings.mount_path());
        table.insert("session-new", format!("{}/new", session))?;
        table.insert("session-save", format!("{}/save/:id", session))?;
        table.insert("session-rollback", format!("{}/rollback/:id", session))?;
        Ok(table)
    }

    pub fn insert(&mut self, endpoint: impl Into<String>, path: impl Into<String>) -> Result<(), ConfigError> {
        let endpoint = endpoint.into();
        if self.paths.contains_key(&endpoint) {
            return Err(ConfigError::DuplicateEndpoint(endpoint));
        }
        self.paths.insert(endpoint, path.into());
        Ok(())
    }

    pub fn path(&self, endpoint: &str) -> Option<&str> {
        self.paths.get(endpoint).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.paths.iter()
    }

    /// Fill the path parameters of `endpoint`; arguments that are not path parameters become
    /// the query string.
    pub fn url_for(&self, endpoint: &str, args: &BTreeMap<String, String>) -> Result<String, LinkError> {
        let template = self
            .path(endpoint)
            .ok_or_else(|| LinkError::UnknownEndpoint(endpoint.to_string()))?;
        let mut remaining = args.clone();
        let mut segments = Vec::new();
        for segment in template.split('/') {
            match segment.strip_prefix(':') {
                Some(param) => {
                    let value = remaining.remove(param).ok_or_else(|| LinkError::MissingParameter {
                        endpoint: endpoint.to_string(),
                        param: param.to_string(),
                    })?;
                    segments.push(urlencoding::encode(&value).into_owned());
                }
                None => segments.push(segment.to_string()),
            }
        }
        let mut url = segments.join("/");
        if !remaining.is_empty() {
            let query = serde_urlencoded::to_string(&remaining).map_err(|e| LinkError::InvalidQuery(e.to_string()))?;
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }
}

/// `{base_path}{/url_prefix}/{alias}` for a model, without a trailing slash.
pub fn model_base_path(settings: &ApiSettings, exposure: &ExposureConfig) -> String {
    let prefix = exposure.url_prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", settings.mount_path(), exposure.endpoint_alias)
    } else {
        format!("{}/{}/{}", settings.mount_path(), prefix, exposure.endpoint_alias)
    }
}

/// Names of the `:param` segments of a path template.
pub fn path_params(template: &str) -> Vec<&str> {
    template.split('/').filter_map(|s| s.strip_prefix(':')).collect()
}
