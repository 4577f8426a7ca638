//! In-memory representation of a stored row and its loaded relationships.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Value(Value),
    /// Loaded to-many relationship.
    Many(Vec<Record>),
    /// Loaded to-one relationship.
    One(Option<Box<Record>>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Name of the model this record belongs to.
    pub model: String,
    /// None until the record has been persisted.
    pub id: Option<i64>,
    cells: BTreeMap<String, Cell>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Record {
            model: model.into(),
            id: None,
            cells: BTreeMap::new(),
        }
    }

    pub fn with_id(model: impl Into<String>, id: i64) -> Self {
        Record {
            id: Some(id),
            ..Record::new(model)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.cells.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, cell: Cell) {
        self.cells.insert(name.into(), cell);
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        self.set(name, Cell::Value(value));
    }

    pub fn remove(&mut self, name: &str) -> Option<Cell> {
        self.cells.remove(name)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&String, &Cell)> {
        self.cells.iter()
    }

    /// Scalar value of a field, or null when unset or relational.
    pub fn value(&self, name: &str) -> &Value {
        match self.cells.get(name) {
            Some(Cell::Value(v)) => v,
            _ => &Value::Null,
        }
    }

    /// Attribute lookup used when binding link parameters: `id`, a scalar, or a to-one relation's id.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return self.id.map(Value::from);
        }
        match self.cells.get(name)? {
            Cell::Value(Value::Null) => None,
            Cell::Value(v) => Some(v.clone()),
            Cell::One(Some(r)) => r.id.map(Value::from),
            Cell::One(None) | Cell::Many(_) => None,
        }
    }

    /// Ids of a loaded to-many relationship.
    pub fn related_ids(&self, name: &str) -> Vec<i64> {
        match self.cells.get(name) {
            Some(Cell::Many(records)) => records.iter().filter_map(|r| r.id).collect(),
            _ => Vec::new(),
        }
    }

    /// Flat JSON view without model knowledge: ids for relationships, raw values otherwise.
    pub fn flat_view(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".into(), self.id.map(Value::from).unwrap_or(Value::Null));
        for (name, cell) in &self.cells {
            let v = match cell {
                Cell::Value(v) => v.clone(),
                Cell::Many(records) => Value::Array(records.iter().filter_map(|r| r.id).map(Value::from).collect()),
                Cell::One(Some(r)) => Value::Object(r.flat_view()),
                Cell::One(None) => Value::Null,
            };
            map.insert(name.clone(), v);
        }
        map
    }
}
