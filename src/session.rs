//! Client-held transactional sessions.
//!
//! A session is an open storage transaction addressed by an opaque id, plus a log of the records
//! created, updated and deleted through it. Idle sessions are reclaimed lazily: the next `open`
//! after a full timeout interval rolls back every session idle for at least that long.

use crate::error::{ApiError, StoreError};
use crate::model::{ModelDef, Record};
use crate::store::{Store, StoreTx};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "CREATE",
            MutationKind::Update => "UPDATE",
            MutationKind::Delete => "DELETE",
        })
    }
}

/// One logged record: the endpoint alias of its model and its JSON view at the time of the write.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggedRecord {
    #[serde(rename = "TYPE")]
    pub alias: String,
    #[serde(rename = "DATA")]
    pub data: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MutationLog {
    #[serde(rename = "CREATE")]
    pub created: Vec<LoggedRecord>,
    #[serde(rename = "UPDATE")]
    pub updated: Vec<LoggedRecord>,
    #[serde(rename = "DELETE")]
    pub deleted: Vec<LoggedRecord>,
}

impl MutationLog {
    /// Appends `entry` unless an identical entry is already in the bucket.
    fn push(&mut self, kind: MutationKind, entry: LoggedRecord) {
        let bucket = match kind {
            MutationKind::Create => &mut self.created,
            MutationKind::Update => &mut self.updated,
            MutationKind::Delete => &mut self.deleted,
        };
        if !bucket.contains(&entry) {
            bucket.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// State owned by one session; locked for the duration of each request that uses it.
pub struct OpenSession {
    tx: Option<Box<dyn StoreTx>>,
    log: MutationLog,
    broken: Option<String>,
}

impl OpenSession {
    pub fn tx(&mut self) -> Result<&mut (dyn StoreTx + 'static), StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::NoTransaction)
    }

    /// Record that the transaction could not be restored after a failed statement. A broken
    /// session refuses to commit.
    pub fn mark_broken(&mut self, reason: impl Into<String>) {
        self.broken.get_or_insert_with(|| reason.into());
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }
}

pub type SessionSlot = Arc<tokio::sync::Mutex<OpenSession>>;

/// Handle returned by [`SessionManager::open`].
#[derive(Clone)]
pub struct SessionLease {
    pub id: String,
    pub slot: SessionSlot,
    /// True when the caller supplied no session id; the request that opened it also closes it.
    pub ad_hoc: bool,
}

struct SessionEntry {
    slot: SessionSlot,
    last_activity: Instant,
}

struct SessionTable {
    open: HashMap<String, SessionEntry>,
    last_sweep: Instant,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    timeout: Duration,
    table: Mutex<SessionTable>,
}

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("No active DB session was found with ID '{}'", id))
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        SessionManager {
            store,
            timeout,
            table: Mutex::new(SessionTable {
                open: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_count(&self) -> usize {
        self.table().open.len()
    }

    /// Reuse the live session `existing`, or start a new one when no id is given.
    pub async fn open(&self, existing: Option<&str>) -> Result<SessionLease, ApiError> {
        self.sweep().await;
        if let Some(id) = existing {
            let mut table = self.table();
            let entry = table.open.get_mut(id).ok_or_else(|| not_found(id))?;
            entry.last_activity = Instant::now();
            return Ok(SessionLease {
                id: id.to_string(),
                slot: entry.slot.clone(),
                ad_hoc: false,
            });
        }

        let tx = self.store.begin().await?;
        let id = Uuid::new_v4().simple().to_string();
        let slot = Arc::new(tokio::sync::Mutex::new(OpenSession {
            tx: Some(tx),
            log: MutationLog::default(),
            broken: None,
        }));
        self.table().open.insert(
            id.clone(),
            SessionEntry {
                slot: slot.clone(),
                last_activity: Instant::now(),
            },
        );
        tracing::debug!(session = %id, "session opened");
        Ok(SessionLease { id, slot, ad_hoc: true })
    }

    /// Roll back every session idle for at least the timeout. Runs at most once per timeout interval.
    async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<(String, SessionSlot)> = {
            let mut table = self.table();
            if now.duration_since(table.last_sweep) < self.timeout {
                return;
            }
            table.last_sweep = now;
            let timeout = self.timeout;
            let ids: Vec<String> = table
                .open
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_activity) >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| table.open.remove(&id).map(|entry| (id, entry.slot)))
                .collect()
        };
        for (id, slot) in expired {
            let mut session = slot.lock().await;
            if let Some(tx) = session.tx.take() {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(session = %id, error = %e, "rollback of timed-out session failed");
                }
            }
            tracing::info!(session = %id, "session timed out and was rolled back");
        }
    }

    fn take(&self, id: &str) -> Result<SessionSlot, ApiError> {
        self.table()
            .open
            .remove(id)
            .map(|entry| entry.slot)
            .ok_or_else(|| not_found(id))
    }

    fn slot(&self, id: &str) -> Result<SessionSlot, ApiError> {
        let mut table = self.table();
        let entry = table.open.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.last_activity = Instant::now();
        Ok(entry.slot.clone())
    }

    /// Commit the session's work and forget it. Returns what it recorded.
    pub async fn commit_and_close(&self, id: &str) -> Result<MutationLog, ApiError> {
        let slot = self.take(id)?;
        let mut session = slot.lock().await;
        let tx = session.tx.take().ok_or(StoreError::NoTransaction)?;
        if let Some(reason) = session.broken.take() {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(session = %id, error = %e, "rollback of broken session failed");
            }
            session.log = MutationLog::default();
            return Err(ApiError::Internal(format!(
                "Unexpected error occurred: DB session '{}' was rolled back after a failed statement: {}",
                id, reason
            )));
        }
        tx.commit().await?;
        tracing::debug!(session = %id, "session committed");
        Ok(std::mem::take(&mut session.log))
    }

    /// Roll back the session's work. With `close` false the session stays open on a fresh
    /// transaction and its log starts over.
    pub async fn rollback(&self, id: &str, close: bool) -> Result<MutationLog, ApiError> {
        let slot = if close { self.take(id)? } else { self.slot(id)? };
        let mut session = slot.lock().await;
        if let Some(tx) = session.tx.take() {
            tx.rollback().await?;
        }
        let log = std::mem::take(&mut session.log);
        session.broken = None;
        if !close {
            session.tx = Some(self.store.begin().await?);
        }
        tracing::debug!(session = %id, close, "session rolled back");
        Ok(log)
    }

    /// Close an ad-hoc session after a failed request, logging rather than raising rollback errors.
    pub async fn discard(&self, lease: &SessionLease) {
        if !lease.ad_hoc {
            return;
        }
        match self.rollback(&lease.id, true).await {
            Ok(_) | Err(ApiError::NotFound(_)) => {}
            Err(e) => tracing::warn!(session = %lease.id, error = %e, "discarding session failed"),
        }
    }

    pub async fn record_mutation(
        &self,
        id: &str,
        kind: MutationKind,
        model: &ModelDef,
        record: &Record,
    ) -> Result<(), ApiError> {
        let exposure = model.exposure().map_err(|_| {
            ApiError::Internal(format!("Record of type {} may not be exposed to the API.", model.name))
        })?;
        let entry = LoggedRecord {
            alias: exposure.endpoint_alias.clone(),
            data: Value::Object(model.to_json_view(record)),
        };
        let slot = self.slot(id)?;
        slot.lock().await.log.push(kind, entry);
        Ok(())
    }

    pub async fn mutations(&self, id: &str) -> Result<MutationLog, ApiError> {
        let slot = self.slot(id)?;
        let log = slot.lock().await.log.clone();
        Ok(log)
    }
}
