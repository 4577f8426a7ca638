//! Declared fields and their semantic types.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// How a to-many relationship is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToManyLink {
    /// Related rows carry a column pointing back at the owner (one-to-many).
    BackReference { column: String },
    /// Association table holding (local, remote) id pairs (many-to-many).
    Association {
        table: String,
        local: String,
        remote: String,
    },
}

/// Semantic type of a declared field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    Integer,
    Float,
    Date,
    DateTime,
    /// Collection of related records; rendered on the wire as a list of their ids.
    ToMany { target: String, link: ToManyLink },
    /// Single related record referenced through `foreign_key` on this model's table.
    Nested { target: String, foreign_key: String },
}

impl FieldType {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::ToMany { .. } | FieldType::Nested { .. })
    }

    /// Name of the related model for relationship types.
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldType::ToMany { target, .. } | FieldType::Nested { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Check a JSON value against a scalar type, normalising dates and integral floats.
    /// Null is accepted for every type; relationship types pass through unchanged.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(value);
        }
        let ok = match (self, &value) {
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Integer, Value::Number(n)) => {
                if n.is_i64() {
                    true
                } else {
                    return match n.as_f64().filter(|f| f.fract() == 0.0) {
                        Some(f) => Ok(Value::from(f as i64)),
                        None => Err(self.mismatch()),
                    };
                }
            }
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Date, Value::String(s)) => return parse_date(s).map(Value::String).ok_or_else(|| self.mismatch()),
            (FieldType::DateTime, Value::String(s)) => {
                return parse_datetime(s).map(Value::String).ok_or_else(|| self.mismatch())
            }
            (FieldType::ToMany { .. } | FieldType::Nested { .. }, _) => true,
            _ => false,
        };
        if ok {
            Ok(value)
        } else {
            Err(self.mismatch())
        }
    }

    /// Interpret a query-string value as this type. Strings pass through unchanged.
    pub fn parse_text(&self, raw: &str) -> Result<Value, String> {
        let parsed = match self {
            FieldType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "n" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldType::Integer | FieldType::Nested { .. } => raw.parse::<i64>().ok().map(Value::from),
            FieldType::Float => raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number),
            FieldType::Date => parse_date(raw).map(Value::String),
            FieldType::DateTime => parse_datetime(raw).map(Value::String),
            FieldType::String | FieldType::ToMany { .. } => Some(Value::String(raw.to_string())),
        };
        parsed.ok_or_else(|| self.mismatch())
    }

    fn mismatch(&self) -> String {
        let expected = match self {
            FieldType::String => "a string",
            FieldType::Bool => "a boolean",
            FieldType::Integer => "an integer",
            FieldType::Float => "a number",
            FieldType::Date => "a date (YYYY-MM-DD)",
            FieldType::DateTime => "an ISO 8601 date-time",
            FieldType::ToMany { .. } => "a list of record ids",
            FieldType::Nested { .. } => "a record id",
        };
        format!("expected {}", expected)
    }
}

fn parse_date(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_datetime(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub unique: bool,
    pub nullable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            ty,
            unique: false,
            nullable: true,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// One-to-many: `target` rows hold `column` referencing this model's id.
    pub fn has_many(name: impl Into<String>, target: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ToMany {
                target: target.into(),
                link: ToManyLink::BackReference { column: column.into() },
            },
        )
    }

    /// Many-to-many through an association table.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldType::ToMany {
                target: target.into(),
                link: ToManyLink::Association {
                    table: table.into(),
                    local: local.into(),
                    remote: remote.into(),
                },
            },
        )
    }

    /// To-one relationship stored in `foreign_key`.
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::Nested {
                target: target.into(),
                foreign_key: foreign_key.into(),
            },
        )
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}
