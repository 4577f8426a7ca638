//! Merge author overrides onto the default exposure config.

use crate::config::resolved::ExposureConfig;
use crate::config::types::ExposureOverrides;
use crate::error::ConfigError;
use crate::model::ModelDef;
use std::collections::BTreeSet;

/// Attach a fully populated exposure config to `model`.
///
/// The merge always starts from the defaults, so exposing the same model again with the same
/// overrides yields the same config. Nothing outside the model's metadata is touched.
pub fn expose(mut model: ModelDef, overrides: ExposureOverrides) -> ModelDef {
    model.exposure = Some(merge(&model.name, overrides));
    model
}

/// Defaults for `model_name` with `overrides` applied: read-only fields and links are unioned,
/// everything else is override-or-default.
pub fn merge(model_name: &str, overrides: ExposureOverrides) -> ExposureConfig {
    let mut config = ExposureConfig::defaults(model_name);
    if let Some(auto) = overrides.auto_api_endpoints {
        config.auto_api_endpoints = auto;
    }
    if let Some(alias) = overrides.endpoint_alias.filter(|a| !a.is_empty()) {
        config.endpoint_alias = alias;
    }
    if let Some(prefix) = overrides.url_prefix {
        config.url_prefix = prefix;
    }
    config.read_only_fields.extend(overrides.read_only_fields);
    if let Some(relations) = overrides.queryable_relations {
        config.queryable_relations = relations;
    }
    let links: BTreeSet<_> = config.links.drain(..).chain(overrides.links).collect();
    config.links = links.into_iter().collect();
    config.links.sort_by(|a, b| a.rel.cmp(&b.rel));
    if let Some(custom) = overrides.custom_endpoints {
        config.custom_endpoints = custom;
    }
    config
}

/// Parse overrides from a JSON document (custom endpoints cannot be expressed in JSON).
pub fn overrides_from_json(json: &str) -> Result<ExposureOverrides, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Validation(format!("exposure overrides: {}", e)))
}
