//! Fully populated exposure config attached to an exposed model.

use crate::config::CustomEndpoint;
use crate::link::{LinkTemplate, ALIAS_PLACEHOLDER};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
pub struct ExposureConfig {
    pub api_exposed: bool,
    /// When false the model is registered and exposed but gets no generated routes.
    pub auto_api_endpoints: bool,
    pub endpoint_alias: String,
    pub url_prefix: String,
    pub read_only_fields: BTreeSet<String>,
    /// Query-string alias -> to-one relation field.
    pub queryable_relations: BTreeMap<String, String>,
    /// De-duplicated and sorted by relation label.
    pub links: Vec<LinkTemplate>,
    pub custom_endpoints: Vec<CustomEndpoint>,
}

impl ExposureConfig {
    pub fn defaults(model_name: &str) -> Self {
        let one = format!("{}-one", ALIAS_PLACEHOLDER);
        ExposureConfig {
            api_exposed: true,
            auto_api_endpoints: true,
            endpoint_alias: model_name.to_lowercase(),
            url_prefix: String::new(),
            read_only_fields: ["id", "_links"].into_iter().map(String::from).collect(),
            queryable_relations: BTreeMap::new(),
            links: vec![
                LinkTemplate::new(one.clone(), "delete record", "DELETE").bind("id", "id"),
                LinkTemplate::new(one, "edit record", "POST").bind("id", "id"),
            ],
            custom_endpoints: Vec::new(),
        }
    }

    pub fn is_read_only(&self, field: &str) -> bool {
        self.read_only_fields.contains(field)
    }
}
