//! Computed (read-derived) properties.

use crate::model::{FieldType, Record};
use serde_json::Value;

/// How a computed property obtains its value.
#[derive(Clone, Copy)]
pub enum Getter {
    /// Needs no record; usable when the model is described without an instance.
    Unbound(fn() -> Value),
    /// Reads from a loaded record.
    Record(fn(&Record) -> Value),
}

pub type Setter = fn(&mut Record, Value) -> Result<(), String>;

#[derive(Clone)]
pub struct ComputedProperty {
    pub name: String,
    /// Properties without a declared return type stay off the API.
    pub returns: Option<FieldType>,
    pub getter: Option<Getter>,
    /// Query-level SQL expression selected alongside the row's columns.
    pub expression: Option<String>,
    pub setter: Option<Setter>,
}

impl ComputedProperty {
    pub fn new(name: impl Into<String>) -> Self {
        ComputedProperty {
            name: name.into(),
            returns: None,
            getter: None,
            expression: None,
            setter: None,
        }
    }

    pub fn returns(mut self, ty: FieldType) -> Self {
        self.returns = Some(ty);
        self
    }

    pub fn getter(mut self, getter: fn(&Record) -> Value) -> Self {
        self.getter = Some(Getter::Record(getter));
        self
    }

    pub fn unbound_getter(mut self, getter: fn() -> Value) -> Self {
        self.getter = Some(Getter::Unbound(getter));
        self
    }

    pub fn expression(mut self, sql: impl Into<String>) -> Self {
        self.expression = Some(sql.into());
        self
    }

    pub fn setter(mut self, setter: Setter) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn has_expression(&self) -> bool {
        self.expression.is_some()
    }

    /// True when the property can be described at the model level: it either has a
    /// query-level expression or a getter that needs no record.
    pub fn usable_without_instance(&self) -> bool {
        self.has_expression() || matches!(self.getter, Some(Getter::Unbound(_)))
    }

    pub fn evaluate(&self, record: &Record) -> Option<Value> {
        match self.getter? {
            Getter::Unbound(f) => Some(f()),
            Getter::Record(f) => Some(f(record)),
        }
    }
}

impl std::fmt::Debug for ComputedProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("has_getter", &self.getter.is_some())
            .field("expression", &self.expression)
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}
