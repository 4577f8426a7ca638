//! Explicit schema description for API-exposed models.
//!
//! Each data model type describes itself once at startup through [`ApiModel::model_def`]: its
//! ordered fields, computed properties and (after [`crate::config::expose`]) its exposure config.
//! A [`SchemaModule`] groups the models that may reference each other.

mod computed;
mod field;
mod record;
mod transform;

pub use computed::*;
pub use field::*;
pub use record::*;
pub use transform::*;

use crate::config::{expose, ExposureConfig, ExposureOverrides};
use crate::error::ConfigError;
use serde_json::{Map, Value};

/// Model-level payload hook run before ingestion; may rewrite the payload.
pub type IngestHook = fn(&Record, Map<String, Value>) -> Result<Map<String, Value>, String>;

/// Implemented by every data model type that takes part in API generation.
pub trait ApiModel {
    fn model_def() -> ModelDef;
}

#[derive(Clone, Debug)]
pub struct ModelDef {
    pub name: String,
    pub table: String,
    /// Declared fields in declaration order.
    pub fields: Vec<FieldDef>,
    pub computed: Vec<ComputedProperty>,
    /// False for plain structs that are not backed by a table.
    pub storage: bool,
    pub exposure: Option<ExposureConfig>,
    pub ingest_hook: Option<IngestHook>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        ModelDef {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            computed: Vec::new(),
            storage: true,
            exposure: None,
            ingest_hook: None,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn property(mut self, property: ComputedProperty) -> Self {
        self.computed.push(property);
        self
    }

    pub fn non_storage(mut self) -> Self {
        self.storage = false;
        self
    }

    pub fn on_ingest(mut self, hook: IngestHook) -> Self {
        self.ingest_hook = Some(hook);
        self
    }

    pub fn exposed(self, overrides: ExposureOverrides) -> Self {
        expose(self, overrides)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&ComputedProperty> {
        self.computed.iter().find(|p| p.name == name)
    }

    /// Computed properties that declare a return type and therefore appear on the API.
    pub fn api_properties(&self) -> impl Iterator<Item = &ComputedProperty> {
        self.computed.iter().filter(|p| p.returns.is_some())
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.ty.is_scalar())
    }

    pub fn is_exposed(&self) -> bool {
        self.exposure.as_ref().is_some_and(|e| e.api_exposed)
    }

    pub fn exposure(&self) -> Result<&ExposureConfig, ConfigError> {
        self.exposure
            .as_ref()
            .filter(|e| e.api_exposed)
            .ok_or_else(|| ConfigError::NotExposed(self.name.clone()))
    }

    /// Endpoint alias, or the lower-cased model name for models without exposure config.
    pub fn alias(&self) -> String {
        match &self.exposure {
            Some(e) => e.endpoint_alias.clone(),
            None => self.name.to_lowercase(),
        }
    }

    /// `id`, scalar stored fields and API properties backed by a query expression may be used
    /// for ordering.
    pub fn is_sortable(&self, name: &str) -> bool {
        name == "id"
            || self.find_field(name).is_some_and(|f| f.ty.is_scalar())
            || self.api_properties().any(|p| p.name == name && p.has_expression())
    }
}

/// The set of models generated together; relationship targets must live in the same module.
#[derive(Clone, Debug, Default)]
pub struct SchemaModule {
    pub name: String,
    models: Vec<ModelDef>,
}

impl SchemaModule {
    pub fn new(name: impl Into<String>) -> Self {
        SchemaModule {
            name: name.into(),
            models: Vec::new(),
        }
    }

    pub fn with(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    pub fn register<M: ApiModel>(self) -> Self {
        self.with(M::model_def())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDef> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.iter()
    }

    pub fn exposed(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.iter().filter(|m| m.is_exposed())
    }

    pub fn by_alias(&self, alias: &str) -> Option<&ModelDef> {
        self.exposed().find(|m| m.alias() == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag;

    impl ApiModel for Tag {
        fn model_def() -> ModelDef {
            ModelDef::new("Tag", "tag")
                .field(FieldDef::string("label").unique())
                .field(FieldDef::has_many("items", "Item", "tag_id"))
                .exposed(ExposureOverrides::new())
        }
    }

    #[test]
    fn module_lookup() {
        let module = SchemaModule::new("app")
            .register::<Tag>()
            .with(ModelDef::new("Item", "item"));
        assert!(module.get("Tag").unwrap().is_exposed());
        assert!(!module.get("Item").unwrap().is_exposed());
        assert_eq!(module.by_alias("tag").map(|m| m.name.as_str()), Some("Tag"));
        assert_eq!(module.exposed().count(), 1);
    }

    #[test]
    fn sortable_fields() {
        let tag = Tag::model_def();
        assert!(tag.is_sortable("id"));
        assert!(tag.is_sortable("label"));
        assert!(!tag.is_sortable("items"));
        assert!(!tag.is_sortable("nope"));

        let counted = Tag::model_def()
            .property(
                ComputedProperty::new("item_count")
                    .returns(FieldType::Integer)
                    .expression("(SELECT COUNT(*) FROM item WHERE item.tag_id = tag.id)"),
            )
            .property(ComputedProperty::new("shout").returns(FieldType::String).unbound_getter(|| Value::Null));
        assert!(counted.is_sortable("item_count"));
        assert!(!counted.is_sortable("shout"));
    }

    #[test]
    fn unexposed_model_reports_config_error() {
        let err = ModelDef::new("Item", "item").exposure().unwrap_err();
        assert!(matches!(err, ConfigError::NotExposed(name) if name == "Item"));
    }
}
