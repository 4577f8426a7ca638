//! Module validation: referential integrity and API consistency, checked before routes are built.

use crate::error::ConfigError;
use crate::model::{FieldType, SchemaModule};
use std::collections::HashSet;

pub fn validate(module: &SchemaModule) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for model in module.models() {
        if !names.insert(model.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "model `{}` is defined twice in module `{}`",
                model.name, module.name
            )));
        }
    }

    for model in module.models() {
        for field in &model.fields {
            if let Some(target) = field.ty.target() {
                if module.get(target).is_none() {
                    return Err(ConfigError::MissingReference {
                        kind: "model",
                        id: format!("{} (field {}.{})", target, model.name, field.name),
                    });
                }
            }
        }
    }

    let mut aliases = HashSet::new();
    for model in module.exposed() {
        let exposure = model.exposure()?;
        if exposure.auto_api_endpoints && !aliases.insert(exposure.endpoint_alias.as_str()) {
            return Err(ConfigError::DuplicateEndpoint(exposure.endpoint_alias.clone()));
        }
        if exposure.endpoint_alias == "session" {
            return Err(ConfigError::DuplicateEndpoint(exposure.endpoint_alias.clone()));
        }
        for (alias, relation) in &exposure.queryable_relations {
            match model.find_field(relation).map(|f| &f.ty) {
                Some(FieldType::Nested { .. }) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "queryable relation `{}` on {} must name a to-one relation field, got `{}`",
                        alias, model.name, relation
                    )))
                }
            }
        }
        for custom in &exposure.custom_endpoints {
            if module.get(&custom.target).is_none() {
                return Err(ConfigError::MissingReference {
                    kind: "model",
                    id: format!("{} (custom endpoint {}.{})", custom.target, model.name, custom.name),
                });
            }
        }
    }

    Ok(())
}
