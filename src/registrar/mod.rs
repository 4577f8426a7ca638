//! Derive wire schemas from model definitions.
//!
//! [`register`] walks a model's fields and API computed properties, registers the schemas of
//! nested sub-models first (once per namespace), and adds the model's payload, full-record,
//! response and detailed-list schemas to the namespace.

pub mod openapi;
mod wire;

pub use wire::*;

use crate::error::ConfigError;
use crate::model::{FieldType, ModelDef, SchemaModule};

/// Names of the schemas registered for one model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaTriple {
    pub payload: String,
    pub response: String,
    pub detailed: String,
}

impl SchemaTriple {
    fn for_name(name: &str) -> Self {
        SchemaTriple {
            payload: format!("{}-payload", name),
            response: format!("{}-response", name),
            detailed: format!("{}-detailed", name),
        }
    }
}

/// Register `model` under `name` in `ns`.
///
/// `visited` holds the names currently being expanded above this call. Returns `Ok(None)` when
/// `name` is already among them; the caller then leaves the referencing field out.
pub fn register(
    ns: &mut Namespace,
    module: &SchemaModule,
    model: &ModelDef,
    name: &str,
    visited: &[String],
) -> Result<Option<SchemaTriple>, ConfigError> {
    let exposure = model.exposure()?;
    if visited.iter().any(|v| v == name) {
        tracing::warn!(
            namespace = %ns.name,
            path = %visited.join(" -> "),
            model = %name,
            "recursive model definition; halting loop"
        );
        return Ok(None);
    }
    let triple = SchemaTriple::for_name(name);
    if ns.contains(name) {
        return Ok(Some(triple));
    }

    let mut api_fields: Vec<(String, WireField)> = Vec::new();
    let mut read_only_properties = Vec::new();
    for property in model.api_properties() {
        if !property.usable_without_instance() {
            return Err(ConfigError::ComputedNeedsExpression {
                model: model.name.clone(),
                property: property.name.clone(),
            });
        }
        if property.setter.is_none() {
            read_only_properties.push(property.name.clone());
        }
    }

    for field in &model.fields {
        let wire = match &field.ty {
            FieldType::Nested { target, .. } => {
                let sub = module.get(target).ok_or_else(|| ConfigError::ForeignSubModel {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    target: target.clone(),
                })?;
                if !sub.storage {
                    return Err(ConfigError::NotStorageModel {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        target: target.clone(),
                    });
                }
                let mut path = visited.to_vec();
                path.push(name.to_string());
                match register(ns, module, sub, &sub.table, &path) {
                    Ok(Some(_)) => WireField::nested(sub.table.clone()),
                    Ok(None) => continue,
                    Err(e) if !visited.is_empty() => return Err(e),
                    Err(e) => {
                        tracing::error!(
                            model = %name,
                            field = %field.name,
                            error = %e,
                            "error generating model; field excluded"
                        );
                        continue;
                    }
                }
            }
            ty => WireField::scalar(ty).ok_or_else(|| ConfigError::UntypedField {
                model: name.to_string(),
                field: field.name.clone(),
            })?,
        };
        api_fields.push((field.name.clone(), wire));
    }
    for property in model.api_properties() {
        let wire = property
            .returns
            .as_ref()
            .and_then(WireField::scalar)
            .ok_or_else(|| ConfigError::UntypedField {
                model: name.to_string(),
                field: property.name.clone(),
            })?;
        api_fields.push((property.name.clone(), wire));
    }

    let payload = api_fields
        .iter()
        .filter(|(field, _)| !exposure.is_read_only(field) && !read_only_properties.contains(field))
        .cloned()
        .collect();
    ns.add(WireSchema::new(triple.payload.clone(), payload));
    ns.inherit(name, RECORD_BASE, api_fields);
    ns.clone_schema(
        &triple.response,
        BASE,
        vec![("result".into(), WireField::nested(name))],
    );
    ns.clone_schema(
        &triple.detailed,
        BASE_PAGINATED,
        vec![("result".into(), WireField::list_of(name))],
    );
    tracing::debug!(namespace = %ns.name, model = %name, "registered wire schemas");
    Ok(Some(triple))
}

/// Schemas served by the session routes.
pub fn session_namespace() -> Namespace {
    let mut ns = Namespace::new("session");
    ns.add(WireSchema::new("new-session", vec![("session_id".into(), WireField::String)]));
    ns.clone_schema(
        "session-response",
        BASE,
        vec![("result".into(), WireField::nested("new-session"))],
    );
    ns.add(WireSchema::new(
        "session-object",
        vec![
            ("TYPE".into(), WireField::String),
            ("DATA".into(), WireField::nested(RECORD_BASE)),
        ],
    ));
    ns.add(WireSchema::new(
        "session-objects",
        ["CREATE", "UPDATE", "DELETE"]
            .into_iter()
            .map(|bucket| (bucket.to_string(), WireField::list_of("session-object")))
            .collect(),
    ));
    ns.clone_schema(
        "session-action-response",
        BASE,
        vec![("result".into(), WireField::nested("session-objects"))],
    );
    ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExposureOverrides;
    use crate::model::{ComputedProperty, FieldDef, Record};
    use serde_json::{json, Value};

    fn count(_: &Record) -> Value {
        json!(0)
    }

    fn constant() -> Value {
        json!("c")
    }

    fn field_names(ns: &Namespace, schema: &str) -> Vec<String> {
        ns.get(schema).unwrap().fields.iter().map(|(n, _)| n.clone()).collect()
    }

    #[test]
    fn builds_payload_record_and_envelopes() {
        let module = SchemaModule::new("app")
            .with(
                ModelDef::new("Parent", "parent")
                    .field(FieldDef::string("name"))
                    .field(FieldDef::has_many("children", "Child", "parent_id"))
                    .property(ComputedProperty::new("size").returns(FieldType::Integer).expression("1"))
                    .property(ComputedProperty::new("label").returns(FieldType::String).unbound_getter(constant))
                    .property(ComputedProperty::new("hidden").getter(count))
                    .exposed(ExposureOverrides::new().read_only("name")),
            )
            .with(ModelDef::new("Child", "child").exposed(ExposureOverrides::new()));
        let parent = module.get("Parent").unwrap();
        let mut ns = Namespace::new("parent");
        let triple = register(&mut ns, &module, parent, "parent", &[]).unwrap().unwrap();

        assert_eq!(triple.payload, "parent-payload");
        assert_eq!(field_names(&ns, "parent-payload"), ["children"]);
        assert_eq!(
            field_names(&ns, "parent"),
            ["id", "_links", "name", "children", "size", "label"]
        );
        assert_eq!(ns.get("parent").unwrap().field("children"), Some(&WireField::IdList));
        assert_eq!(
            ns.get("parent-detailed").unwrap().field("result"),
            Some(&WireField::list_of("parent"))
        );
        assert_eq!(
            ns.get("parent-response").unwrap().field("info"),
            Some(&WireField::nested(INFO_BASE))
        );
    }

    #[test]
    fn instance_only_property_is_a_config_error() {
        let module = SchemaModule::new("app").with(
            ModelDef::new("Thing", "thing")
                .property(ComputedProperty::new("count").returns(FieldType::Integer).getter(count))
                .exposed(ExposureOverrides::new()),
        );
        let mut ns = Namespace::new("thing");
        let err = register(&mut ns, &module, module.get("Thing").unwrap(), "thing", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::ComputedNeedsExpression { ref property, .. } if property == "count"));
    }

    #[test]
    fn self_reference_terminates_without_the_repeated_branch() {
        let module = SchemaModule::new("app").with(
            ModelDef::new("Node", "node")
                .field(FieldDef::string("name"))
                .field(FieldDef::belongs_to("parent", "Node", "parent_id"))
                .exposed(ExposureOverrides::new()),
        );
        let mut ns = Namespace::new("node");
        register(&mut ns, &module, module.get("Node").unwrap(), "node", &[]).unwrap();
        assert_eq!(field_names(&ns, "node"), ["id", "_links", "name"]);
    }

    #[test]
    fn nested_models_register_once_under_their_table() {
        let module = SchemaModule::new("app")
            .with(
                ModelDef::new("Child", "child")
                    .field(FieldDef::belongs_to("parent", "Parent", "parent_id"))
                    .field(FieldDef::belongs_to("guardian", "Parent", "guardian_id"))
                    .exposed(ExposureOverrides::new().alias("kids")),
            )
            .with(
                ModelDef::new("Parent", "parent_table")
                    .field(FieldDef::string("name"))
                    .exposed(ExposureOverrides::new()),
            );
        let mut ns = Namespace::new("kids");
        register(&mut ns, &module, module.get("Child").unwrap(), "kids", &[]).unwrap();
        assert_eq!(ns.get("kids").unwrap().field("parent"), Some(&WireField::nested("parent_table")));
        assert_eq!(ns.get("kids").unwrap().field("guardian"), Some(&WireField::nested("parent_table")));
        assert!(ns.contains("parent_table-payload"));
    }

    #[test]
    fn unexposed_sub_model_is_excluded_at_top_level() {
        let module = SchemaModule::new("app")
            .with(
                ModelDef::new("Child", "child")
                    .field(FieldDef::string("name"))
                    .field(FieldDef::belongs_to("parent", "Parent", "parent_id"))
                    .exposed(ExposureOverrides::new()),
            )
            .with(ModelDef::new("Parent", "parent"));
        let mut ns = Namespace::new("child");
        register(&mut ns, &module, module.get("Child").unwrap(), "child", &[]).unwrap();
        assert_eq!(field_names(&ns, "child"), ["id", "_links", "name"]);
    }

    #[test]
    fn non_storage_sub_model_is_rejected() {
        let module = SchemaModule::new("app")
            .with(
                ModelDef::new("Child", "child")
                    .field(FieldDef::belongs_to("shape", "Shape", "shape_id"))
                    .exposed(ExposureOverrides::new()),
            )
            .with(ModelDef::new("Shape", "shape").non_storage().exposed(ExposureOverrides::new()));
        let mut ns = Namespace::new("child");
        let err = register(&mut ns, &module, module.get("Child").unwrap(), "child", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::NotStorageModel { .. }));
    }

    #[test]
    fn session_schemas() {
        let ns = session_namespace();
        assert_eq!(field_names(&ns, "session-objects"), ["CREATE", "UPDATE", "DELETE"]);
        assert_eq!(
            ns.get("session-action-response").unwrap().field("result"),
            Some(&WireField::nested("session-objects"))
        );
    }
}
