//! Moving records to and from their JSON representation.

use crate::error::ApiError;
use crate::model::{Cell, FieldType, ModelDef, Record, SchemaModule};
use crate::session::SessionManager;
use crate::store::StoreTx;
use serde_json::{Map, Value};

pub const DEFAULT_TRUNCATE_LENGTH: usize = 255;

impl ModelDef {
    /// JSON view of a record: `id`, every declared field and every API computed property.
    /// To-many relationships become id lists, nested records their own flat view.
    pub fn to_json_view(&self, record: &Record) -> Map<String, Value> {
        let mut view = Map::new();
        view.insert("id".into(), record.id.map_or(Value::Null, Value::from));
        for field in &self.fields {
            let value = match (&field.ty, record.get(&field.name)) {
                (FieldType::ToMany { .. }, _) => {
                    Value::Array(record.related_ids(&field.name).into_iter().map(Value::from).collect())
                }
                (_, Some(Cell::One(Some(nested)))) => Value::Object(nested.flat_view()),
                (_, Some(Cell::Value(v))) => v.clone(),
                _ => Value::Null,
            };
            view.insert(field.name.clone(), value);
        }
        for property in self.api_properties() {
            let value = match record.get(&property.name) {
                Some(Cell::Value(v)) => v.clone(),
                _ => property.evaluate(record).unwrap_or(Value::Null),
            };
            view.insert(property.name.clone(), value);
        }
        view
    }

    /// [`to_json_view`](Self::to_json_view) with top-level strings cut to `length` characters.
    pub fn to_json_view_truncated(&self, record: &Record, truncate: bool, length: usize) -> Map<String, Value> {
        let mut view = self.to_json_view(record);
        if truncate {
            for value in view.values_mut() {
                if let Value::String(s) = value {
                    if s.chars().count() > length {
                        *s = s.chars().take(length).collect();
                    }
                }
            }
        }
        view
    }

    /// Load `payload` into `record`, resolving relationship ids through `tx`.
    pub async fn ingest(
        &self,
        module: &SchemaModule,
        record: &mut Record,
        payload: Map<String, Value>,
        tx: &mut dyn StoreTx,
    ) -> Result<(), ApiError> {
        let payload = match self.ingest_hook {
            Some(hook) => hook(record, payload).map_err(ApiError::validation)?,
            None => payload,
        };
        for (key, value) in payload {
            if key == "id" {
                if let Some(id) = value.as_i64() {
                    record.id = Some(id);
                }
                continue;
            }
            if key == "_links" {
                continue;
            }
            if let Some(field) = self.find_field(&key) {
                match &field.ty {
                    FieldType::ToMany { target, .. } => {
                        let target = related_model(module, target)?;
                        let ids = id_list(&key, &value)?;
                        let found = tx.fetch_many(&target.name, &ids).await?;
                        self.check_resolved(&key, &ids, &found)?;
                        record.set(key, Cell::Many(found));
                    }
                    FieldType::Nested { target, .. } => {
                        let target = related_model(module, target)?;
                        let nested = match nested_id(&key, &value)? {
                            Some(id) => {
                                let found = tx.fetch(&target.name, id).await?;
                                let found: Vec<Record> = found.into_iter().collect();
                                self.check_resolved(&key, &[id], &found)?;
                                found.into_iter().next().map(Box::new)
                            }
                            None => None,
                        };
                        record.set(key, Cell::One(nested));
                    }
                    ty => {
                        let value = ty
                            .coerce(value)
                            .map_err(|e| ApiError::validation(format!("Invalid value for `{}`: {}", key, e)))?;
                        record.set_value(key, value);
                    }
                }
                continue;
            }
            match self.find_property(&key).and_then(|p| p.setter) {
                Some(setter) => setter(record, value).map_err(ApiError::validation)?,
                None if self.find_property(&key).is_some() => {
                    return Err(ApiError::validation(format!("Attribute `{}` is read-only.", key)))
                }
                None => return Err(ApiError::validation(format!("Attribute `{}` not found on model.", key))),
            }
        }
        Ok(())
    }

    fn check_resolved(&self, key: &str, wanted: &[i64], found: &[Record]) -> Result<(), ApiError> {
        let missed: Vec<String> = wanted
            .iter()
            .filter(|id| !found.iter().any(|r| r.id == Some(**id)))
            .map(i64::to_string)
            .collect();
        if missed.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(format!(
                "Could not find `{}.{}` records with value(s) {}",
                self.table,
                key,
                missed.join(", ")
            )))
        }
    }

    /// [`ingest`](Self::ingest) inside a session. Without `session_id` a session is opened for
    /// the call and committed (or rolled back on failure) before returning.
    pub async fn ingest_in_session(
        &self,
        module: &SchemaModule,
        sessions: &SessionManager,
        session_id: Option<&str>,
        record: &mut Record,
        payload: Map<String, Value>,
    ) -> Result<(), ApiError> {
        let lease = sessions.open(session_id).await?;
        let result = {
            let mut session = lease.slot.lock().await;
            match session.tx() {
                Ok(tx) => self.ingest(module, record, payload, tx).await,
                Err(e) => Err(e.into()),
            }
        };
        match result {
            Ok(()) if lease.ad_hoc => sessions.commit_and_close(&lease.id).await.map(|_| ()),
            Ok(()) => Ok(()),
            Err(e) => {
                sessions.discard(&lease).await;
                Err(e)
            }
        }
    }
}

fn related_model<'m>(module: &'m SchemaModule, name: &str) -> Result<&'m ModelDef, ApiError> {
    module
        .get(name)
        .ok_or_else(|| ApiError::Internal(format!("Unexpected error occurred: UnknownModel {}", name)))
}

fn id_list(key: &str, value: &Value) -> Result<Vec<i64>, ApiError> {
    let invalid = || ApiError::validation(format!("Invalid value for `{}`: expected a list of record ids", key));
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(|v| v.as_i64().ok_or_else(invalid)).collect(),
        _ => Err(invalid()),
    }
}

/// A nested reference is given as an id, or as an object carrying one.
fn nested_id(key: &str, value: &Value) -> Result<Option<i64>, ApiError> {
    match value {
        Value::Null => Some(None),
        Value::Number(_) => value.as_i64().map(Some),
        Value::Object(obj) => match obj.get("id") {
            Some(Value::Null) | None => Some(None),
            Some(id) => id.as_i64().map(Some),
        },
        _ => None,
    }
    .ok_or_else(|| ApiError::validation(format!("Invalid value for `{}`: expected a record id", key)))
}
