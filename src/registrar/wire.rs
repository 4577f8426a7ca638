//! Wire schemas and the per-model namespace that holds them.

use crate::model::FieldType;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const LINKS: &str = "_links";
pub const RECORD_BASE: &str = "record-base";
pub const INFO_BASE: &str = "info-base";
pub const PAGINATION: &str = "pagination";
pub const BASE: &str = "base";
pub const PAGINATED_INFO: &str = "paginated-info";
pub const BASE_PAGINATED: &str = "base-paginated";

/// Wire-level type of one schema field.
#[derive(Clone, Debug, PartialEq)]
pub enum WireField {
    String,
    Boolean,
    Integer,
    Float,
    Date,
    DateTime,
    /// List of related record ids.
    IdList,
    /// Another schema registered in the same namespace.
    Nested(String),
    List(Box<WireField>),
}

impl WireField {
    /// Fixed mapping for scalar and to-many types. Nested types need recursive registration.
    pub fn scalar(ty: &FieldType) -> Option<WireField> {
        Some(match ty {
            FieldType::String => WireField::String,
            FieldType::Bool => WireField::Boolean,
            FieldType::Integer => WireField::Integer,
            FieldType::Float => WireField::Float,
            FieldType::Date => WireField::Date,
            FieldType::DateTime => WireField::DateTime,
            FieldType::ToMany { .. } => WireField::IdList,
            FieldType::Nested { .. } => return None,
        })
    }

    pub fn nested(schema: impl Into<String>) -> Self {
        WireField::Nested(schema.into())
    }

    pub fn list_of(schema: impl Into<String>) -> Self {
        WireField::List(Box::new(WireField::Nested(schema.into())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WireSchema {
    pub name: String,
    /// Fields in declaration order; inherited fields come first.
    pub fields: Vec<(String, WireField)>,
}

impl WireSchema {
    pub fn new(name: impl Into<String>, fields: Vec<(String, WireField)>) -> Self {
        WireSchema {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&WireField> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

fn fields(list: &[(&str, WireField)]) -> Vec<(String, WireField)> {
    list.iter().map(|(n, f)| (n.to_string(), f.clone())).collect()
}

/// Route group for one model: the generic envelope schemas plus every model schema registered
/// while generating it.
#[derive(Clone, Debug)]
pub struct Namespace {
    pub name: String,
    schemas: BTreeMap<String, WireSchema>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        let mut ns = Namespace {
            name: name.into(),
            schemas: BTreeMap::new(),
        };
        ns.add(WireSchema::new(
            LINKS,
            fields(&[
                ("href", WireField::String),
                ("rel", WireField::String),
                ("method", WireField::String),
            ]),
        ));
        ns.add(WireSchema::new(
            RECORD_BASE,
            fields(&[("id", WireField::Integer), (LINKS, WireField::list_of(LINKS))]),
        ));
        ns.add(WireSchema::new(
            INFO_BASE,
            fields(&[
                ("code", WireField::Integer),
                ("message", WireField::String),
                ("session", WireField::String),
            ]),
        ));
        ns.add(WireSchema::new(
            PAGINATION,
            fields(&[
                ("page", WireField::Integer),
                ("total_pages", WireField::Integer),
                ("total_results", WireField::Integer),
            ]),
        ));
        ns.add(WireSchema::new(
            BASE,
            fields(&[
                ("result", WireField::nested(RECORD_BASE)),
                ("success", WireField::Boolean),
                ("info", WireField::nested(INFO_BASE)),
            ]),
        ));
        let pagination = ns.schemas[PAGINATION].fields.clone();
        ns.clone_schema(PAGINATED_INFO, INFO_BASE, pagination);
        ns.clone_schema(
            BASE_PAGINATED,
            BASE,
            fields(&[
                ("result", WireField::list_of(RECORD_BASE)),
                ("info", WireField::nested(PAGINATED_INFO)),
            ]),
        );
        ns
    }

    pub fn add(&mut self, schema: WireSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&WireSchema> {
        self.schemas.get(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &WireSchema> {
        self.schemas.values()
    }

    /// Register `name` as `parent`'s fields followed by `own`.
    pub fn inherit(&mut self, name: &str, parent: &str, own: Vec<(String, WireField)>) {
        let mut merged = self.get(parent).map(|p| p.fields.clone()).unwrap_or_default();
        for (field, ty) in own {
            if !merged_contains(&merged, &field) {
                merged.push((field, ty));
            }
        }
        self.add(WireSchema::new(name, merged));
    }

    /// Register `name` as a copy of `parent` with `overrides` replacing or extending its fields.
    pub fn clone_schema(&mut self, name: &str, parent: &str, overrides: Vec<(String, WireField)>) {
        let mut merged = self.get(parent).map(|p| p.fields.clone()).unwrap_or_default();
        for (field, ty) in overrides {
            match merged.iter_mut().find(|(n, _)| *n == field) {
                Some(slot) => slot.1 = ty,
                None => merged.push((field, ty)),
            }
        }
        self.add(WireSchema::new(name, merged));
    }

    /// Project `value` onto `schema`: every schema field is present (null when missing) and
    /// keys the schema does not declare are dropped. Unknown schemas leave the value untouched.
    pub fn marshal(&self, schema: &str, value: &Value) -> Value {
        let Some(schema) = self.get(schema) else {
            return value.clone();
        };
        let Value::Object(obj) = value else {
            return Value::Null;
        };
        let mut out = Map::new();
        for (name, ty) in &schema.fields {
            let v = obj.get(name).unwrap_or(&Value::Null);
            out.insert(name.clone(), self.marshal_field(ty, v));
        }
        Value::Object(out)
    }

    fn marshal_field(&self, ty: &WireField, value: &Value) -> Value {
        match (ty, value) {
            (_, Value::Null) => Value::Null,
            (WireField::Nested(schema), v) => self.marshal(schema, v),
            (WireField::List(inner), Value::Array(items)) => {
                Value::Array(items.iter().map(|v| self.marshal_field(inner, v)).collect())
            }
            (WireField::List(_), _) => Value::Null,
            (_, v) => v.clone(),
        }
    }
}

fn merged_contains(fields: &[(String, WireField)], name: &str) -> bool {
    fields.iter().any(|(n, _)| n == name)
}
