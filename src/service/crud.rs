//! Generic record operations run inside client or ad-hoc sessions.
//!
//! Every operation opens (or reuses) a session, runs against its transaction and, when the
//! session was opened for this call only, commits and closes it. Every operation runs inside a
//! savepoint so a failed statement leaves earlier work in a client session untouched. When the
//! savepoint itself cannot be restored the session is marked broken and will refuse to commit.

use crate::error::ApiError;
use crate::model::{ModelDef, Record, SchemaModule, DEFAULT_TRUNCATE_LENGTH};
use crate::session::{MutationKind, OpenSession, SessionManager};
use crate::store::{ListQuery, Page, StoreTx};
use serde_json::{Map, Value};

/// One unit of work against a model.
#[derive(Debug)]
pub enum Operation {
    List(ListQuery),
    Fetch(i64),
    Create(Map<String, Value>),
    Update(i64, Map<String, Value>),
    Delete(i64),
}

impl Operation {
    fn mutation_kind(&self) -> Option<MutationKind> {
        match self {
            Operation::Create(_) => Some(MutationKind::Create),
            Operation::Update(..) => Some(MutationKind::Update),
            Operation::Delete(_) => Some(MutationKind::Delete),
            Operation::List(_) | Operation::Fetch(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Page(Page),
    Record(Record),
}

pub fn record_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("Record with ID `{}` not found", id))
}

/// Payload copy for debug logging with long strings shortened.
pub fn payload_preview(payload: &Map<String, Value>) -> Value {
    let preview = payload
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) if s.chars().count() > DEFAULT_TRUNCATE_LENGTH => Value::String(format!(
                    "{}... (truncated)",
                    s.chars().take(DEFAULT_TRUNCATE_LENGTH).collect::<String>()
                )),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect();
    Value::Object(preview)
}

pub struct CrudService;

impl CrudService {
    pub async fn list(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        query: ListQuery,
        session: Option<&str>,
    ) -> Result<Page, ApiError> {
        match Self::run(sessions, module, model, Operation::List(query), session).await? {
            Outcome::Page(page) => Ok(page),
            Outcome::Record(_) => Err(ApiError::Internal("Unexpected error occurred: list returned a record".into())),
        }
    }

    pub async fn fetch(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        id: i64,
        session: Option<&str>,
    ) -> Result<Record, ApiError> {
        Self::record(sessions, module, model, Operation::Fetch(id), session).await
    }

    pub async fn create(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        payload: Map<String, Value>,
        session: Option<&str>,
    ) -> Result<Record, ApiError> {
        Self::record(sessions, module, model, Operation::Create(payload), session).await
    }

    pub async fn update(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        id: i64,
        payload: Map<String, Value>,
        session: Option<&str>,
    ) -> Result<Record, ApiError> {
        Self::record(sessions, module, model, Operation::Update(id, payload), session).await
    }

    /// Returns the record as it was before deletion.
    pub async fn delete(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        id: i64,
        session: Option<&str>,
    ) -> Result<Record, ApiError> {
        Self::record(sessions, module, model, Operation::Delete(id), session).await
    }

    async fn record(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        op: Operation,
        session: Option<&str>,
    ) -> Result<Record, ApiError> {
        match Self::run(sessions, module, model, op, session).await? {
            Outcome::Record(record) => Ok(record),
            Outcome::Page(_) => Err(ApiError::Internal("Unexpected error occurred: expected a record".into())),
        }
    }

    /// Open or reuse a session, apply `op`, log mutations, and close ad-hoc sessions: committed
    /// on success, rolled back on failure.
    pub async fn run(
        sessions: &SessionManager,
        module: &SchemaModule,
        model: &ModelDef,
        op: Operation,
        session: Option<&str>,
    ) -> Result<Outcome, ApiError> {
        let lease = sessions.open(session).await?;
        let kind = op.mutation_kind();
        let result = async {
            let outcome = {
                let mut open = lease.slot.lock().await;
                Self::apply_in_savepoint(&mut open, module, model, op).await?
            };
            if let (Some(kind), Outcome::Record(record)) = (kind, &outcome) {
                sessions.record_mutation(&lease.id, kind, model, record).await?;
            }
            if lease.ad_hoc {
                sessions.commit_and_close(&lease.id).await?;
            }
            Ok::<_, ApiError>(outcome)
        }
        .await;
        if let Err(e) = &result {
            if !e.is_expected() {
                tracing::error!(model = %model.name, session = %lease.id, error = %e, "unexpected error");
            }
            sessions.discard(&lease).await;
        }
        result
    }

    async fn apply_in_savepoint(
        session: &mut OpenSession,
        module: &SchemaModule,
        model: &ModelDef,
        op: Operation,
    ) -> Result<Outcome, ApiError> {
        let tx = session.tx()?;
        if let Err(e) = tx.savepoint().await {
            session.mark_broken(e.to_string());
            return Err(e.into());
        }
        match Self::apply(tx, module, model, op).await {
            Ok(outcome) => match tx.release_savepoint().await {
                Ok(()) => Ok(outcome),
                Err(e) => {
                    session.mark_broken(e.to_string());
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback_to_savepoint().await {
                    tracing::warn!(model = %model.name, error = %rollback, "rollback to savepoint failed");
                    session.mark_broken(rollback.to_string());
                }
                Err(e)
            }
        }
    }

    async fn apply(
        tx: &mut dyn StoreTx,
        module: &SchemaModule,
        model: &ModelDef,
        op: Operation,
    ) -> Result<Outcome, ApiError> {
        Ok(match op {
            Operation::List(query) => Outcome::Page(tx.list(&model.name, &query).await?),
            Operation::Fetch(id) => Outcome::Record(
                tx.fetch(&model.name, id)
                    .await?
                    .ok_or_else(|| record_not_found(id))?,
            ),
            Operation::Create(payload) => {
                tracing::debug!(model = %model.name, payload = %payload_preview(&payload), "create");
                let mut record = Record::new(model.name.clone());
                model.ingest(module, &mut record, payload, tx).await?;
                Outcome::Record(tx.save(&model.name, &record).await?)
            }
            Operation::Update(id, payload) => {
                tracing::debug!(model = %model.name, id, payload = %payload_preview(&payload), "update");
                let mut record = tx
                    .fetch(&model.name, id)
                    .await?
                    .ok_or_else(|| record_not_found(id))?;
                model.ingest(module, &mut record, payload, tx).await?;
                Outcome::Record(tx.save(&model.name, &record).await?)
            }
            Operation::Delete(id) => {
                let record = tx
                    .fetch(&model.name, id)
                    .await?
                    .ok_or_else(|| record_not_found(id))?;
                if !tx.delete(&model.name, id).await? {
                    return Err(record_not_found(id));
                }
                Outcome::Record(record)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExposureOverrides;
    use crate::model::FieldDef;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<SchemaModule>, MemoryStore, SessionManager) {
        let module = Arc::new(
            SchemaModule::new("test").with(
                ModelDef::new("Tag", "tag")
                    .field(FieldDef::string("label").unique())
                    .exposed(ExposureOverrides::new()),
            ),
        );
        let store = MemoryStore::new(module.clone());
        let sessions = SessionManager::new(Arc::new(store.clone()), Duration::from_secs(600));
        (module, store, sessions)
    }

    fn label(value: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("label".into(), json!(value));
        map
    }

    #[tokio::test]
    async fn ad_hoc_create_commits() {
        let (module, store, sessions) = setup();
        let tag = module.get("Tag").unwrap();
        let record = CrudService::create(&sessions, &module, tag, label("a"), None).await.unwrap();
        assert_eq!(record.id, Some(1));
        assert_eq!(store.committed_count("tag").unwrap(), 1);
        assert_eq!(sessions.open_count(), 0);
    }

    #[tokio::test]
    async fn conflict_in_client_session_keeps_earlier_work() {
        let (module, store, sessions) = setup();
        let tag = module.get("Tag").unwrap();
        let lease = sessions.open(None).await.unwrap();
        CrudService::create(&sessions, &module, tag, label("a"), Some(&lease.id)).await.unwrap();
        let err = CrudService::create(&sessions, &module, tag, label("a"), Some(&lease.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        CrudService::create(&sessions, &module, tag, label("b"), Some(&lease.id)).await.unwrap();

        let log = sessions.commit_and_close(&lease.id).await.unwrap();
        assert_eq!(log.created.len(), 2);
        assert_eq!(store.committed_count("tag").unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_read_in_client_session_keeps_earlier_work() {
        let (module, store, sessions) = setup();
        let tag = module.get("Tag").unwrap();
        let lease = sessions.open(None).await.unwrap();
        CrudService::create(&sessions, &module, tag, label("kept"), Some(&lease.id)).await.unwrap();
        let err = CrudService::fetch(&sessions, &module, tag, 99, Some(&lease.id)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(!lease.slot.lock().await.is_broken());

        let log = sessions.commit_and_close(&lease.id).await.unwrap();
        assert_eq!(log.created.len(), 1);
        assert_eq!(store.committed_count("tag").unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_record_is_not_found_and_session_closed() {
        let (module, _, sessions) = setup();
        let tag = module.get("Tag").unwrap();
        let err = CrudService::delete(&sessions, &module, tag, 42, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Record with ID `42` not found");
        assert_eq!(sessions.open_count(), 0);
    }

    #[test]
    fn preview_truncates_long_strings() {
        let mut payload = Map::new();
        payload.insert("body".into(), json!("x".repeat(300)));
        payload.insert("n".into(), json!(1));
        let preview = payload_preview(&payload);
        assert!(preview["body"].as_str().unwrap().ends_with("... (truncated)"));
        assert_eq!(preview["body"].as_str().unwrap().len(), 255 + "... (truncated)".len());
        assert_eq!(preview["n"], json!(1));
    }
}
