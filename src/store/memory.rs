//! In-process relational backend.
//!
//! Each transaction works on a snapshot of the committed tables and records every write in a
//! journal; commit replays the journal onto the shared tables. Updates are journaled as the
//! changed columns only, so concurrent transactions touching different columns of a row both
//! land. Unique constraints are checked again against the replayed state before it is published.
//! Savepoints are snapshots of the working copy plus the journal length at the time they were
//! taken. Ids come from per-table counters shared by all transactions, so they behave like
//! database sequences.

use crate::error::StoreError;
use crate::model::{Cell, FieldType, ModelDef, Record, SchemaModule, ToManyLink};
use crate::store::{ListQuery, Page, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Row = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<i64, Row>>,
    /// Association table -> (local id, remote id) pairs.
    links: HashMap<String, BTreeSet<(i64, i64)>>,
}

#[derive(Clone, Debug)]
enum Op {
    Insert { table: String, id: i64, row: Row },
    /// Changed columns of an existing row; dropped if the row is gone by commit time.
    Update { table: String, id: i64, changes: Row },
    Remove { table: String, id: i64 },
    Link { table: String, pair: (i64, i64) },
    Unlink { table: String, pair: (i64, i64) },
}

impl Tables {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::Insert { table, id, row } => {
                self.rows.entry(table.clone()).or_default().insert(*id, row.clone());
            }
            Op::Update { table, id, changes } => {
                if let Some(row) = self.rows.get_mut(table).and_then(|rows| rows.get_mut(id)) {
                    row.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Op::Remove { table, id } => {
                if let Some(rows) = self.rows.get_mut(table) {
                    rows.remove(id);
                }
            }
            Op::Link { table, pair } => {
                self.links.entry(table.clone()).or_default().insert(*pair);
            }
            Op::Unlink { table, pair } => {
                if let Some(pairs) = self.links.get_mut(table) {
                    pairs.remove(pair);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    sequences: HashMap<String, i64>,
}

#[derive(Clone)]
pub struct MemoryStore {
    module: Arc<SchemaModule>,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new(module: Arc<SchemaModule>) -> Self {
        MemoryStore {
            module,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Number of committed rows in `table`.
    pub fn committed_count(&self, table: &str) -> Result<usize, StoreError> {
        let shared = lock(&self.shared)?;
        Ok(shared.tables.rows.get(table).map_or(0, BTreeMap::len))
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, StoreError> {
    shared
        .lock()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let snapshot = lock(&self.shared)?.tables.clone();
        Ok(Box::new(MemoryTx {
            module: self.module.clone(),
            shared: self.shared.clone(),
            working: snapshot,
            journal: Vec::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        lock(&self.shared).map(|_| ())
    }
}

struct MemoryTx {
    module: Arc<SchemaModule>,
    shared: Arc<Mutex<Shared>>,
    working: Tables,
    journal: Vec<Op>,
    savepoints: Vec<(Tables, usize)>,
}

impl MemoryTx {
    fn model(&self, name: &str) -> Result<&ModelDef, StoreError> {
        self.module
            .get(name)
            .filter(|m| m.storage)
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    fn record(&mut self, op: Op) {
        self.working.apply(&op);
        self.journal.push(op);
    }

    /// Journal `row` as an insert, or as the columns that differ from the current row.
    fn put(&mut self, table: &str, id: i64, row: Row) {
        let op = match self.row(table, id) {
            Some(current) => {
                let changes: Row = row.into_iter().filter(|(k, v)| current.get(k) != Some(v)).collect();
                if changes.is_empty() {
                    return;
                }
                Op::Update { table: table.to_string(), id, changes }
            }
            None => Op::Insert { table: table.to_string(), id, row },
        };
        self.record(op);
    }

    fn row(&self, table: &str, id: i64) -> Option<&Row> {
        self.working.rows.get(table).and_then(|rows| rows.get(&id))
    }

    fn next_id(&self, table: &str) -> Result<i64, StoreError> {
        let mut shared = lock(&self.shared)?;
        let committed_max = shared
            .tables
            .rows
            .get(table)
            .and_then(|rows| rows.keys().next_back().copied())
            .unwrap_or(0);
        let seq = shared.sequences.entry(table.to_string()).or_insert(0);
        *seq = (*seq).max(committed_max) + 1;
        Ok(*seq)
    }

    /// Record with scalar cells only.
    fn shallow(&self, model: &ModelDef, id: i64, row: &Row) -> Record {
        let mut record = Record::with_id(model.name.clone(), id);
        for field in model.scalar_fields() {
            record.set_value(field.name.clone(), row.get(&field.name).cloned().unwrap_or(Value::Null));
        }
        record
    }

    fn related(&self, target: &str, ids: impl IntoIterator<Item = i64>) -> Result<Vec<Record>, StoreError> {
        let model = self.model(target)?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(row) = self.row(&model.table, id) {
                out.push(self.shallow(model, id, row));
            }
        }
        Ok(out)
    }

    /// Record with scalar cells plus one level of relationships.
    fn load(&self, model: &ModelDef, id: i64) -> Result<Option<Record>, StoreError> {
        let Some(row) = self.row(&model.table, id) else {
            return Ok(None);
        };
        let mut record = self.shallow(model, id, row);
        for field in &model.fields {
            match &field.ty {
                FieldType::Nested { target, foreign_key } => {
                    let nested = match row.get(foreign_key).and_then(Value::as_i64) {
                        Some(fk) => self.related(target, [fk])?.pop().map(Box::new),
                        None => None,
                    };
                    record.set(field.name.clone(), Cell::One(nested));
                }
                FieldType::ToMany { target, link } => {
                    let ids = self.linked_ids(target, link, id)?;
                    record.set(field.name.clone(), Cell::Many(self.related(target, ids)?));
                }
                _ => {}
            }
        }
        Ok(Some(record))
    }

    fn linked_ids(&self, target: &str, link: &ToManyLink, owner: i64) -> Result<Vec<i64>, StoreError> {
        Ok(match link {
            ToManyLink::BackReference { column } => {
                let table = &self.model(target)?.table;
                self.working
                    .rows
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|(_, row)| row.get(column).and_then(Value::as_i64) == Some(owner))
                            .map(|(id, _)| *id)
                            .collect()
                    })
                    .unwrap_or_default()
            }
            ToManyLink::Association { table, .. } => self
                .working
                .links
                .get(table)
                .map(|pairs| pairs.iter().filter(|(l, _)| *l == owner).map(|(_, r)| *r).collect())
                .unwrap_or_default(),
        })
    }

    fn check_unique(&self, model: &ModelDef, id: i64, row: &Row) -> Result<(), StoreError> {
        unique_clash(&self.working, model, id, row)
    }

    fn write_to_many(&mut self, model: &ModelDef, id: i64, target: &str, link: &ToManyLink, ids: &[i64]) -> Result<(), StoreError> {
        let target_table = self.model(target)?.table.clone();
        for rid in ids {
            if self.row(&target_table, *rid).is_none() {
                return Err(StoreError::Backend(format!(
                    "{}.{} references missing {} record {}",
                    model.table, target, target_table, rid
                )));
            }
        }
        match link {
            ToManyLink::BackReference { column } => {
                let current = self.linked_ids(target, link, id)?;
                for rid in current.iter().filter(|r| !ids.contains(r)) {
                    if let Some(mut row) = self.row(&target_table, *rid).cloned() {
                        row.insert(column.clone(), Value::Null);
                        self.put(&target_table, *rid, row);
                    }
                }
                for rid in ids {
                    if let Some(mut row) = self.row(&target_table, *rid).cloned() {
                        row.insert(column.clone(), Value::from(id));
                        self.put(&target_table, *rid, row);
                    }
                }
            }
            ToManyLink::Association { table, .. } => {
                for rid in self.linked_ids(target, link, id)? {
                    self.record(Op::Unlink { table: table.clone(), pair: (id, rid) });
                }
                for rid in ids {
                    self.record(Op::Link { table: table.clone(), pair: (id, *rid) });
                }
            }
        }
        Ok(())
    }

    /// Stored value of `column`, or a computed property evaluated on the row. Properties that
    /// only have a SQL expression sort as null here.
    fn sort_key(&self, model: &ModelDef, id: i64, row: &Row, column: &str) -> Value {
        if column == "id" {
            return Value::from(id);
        }
        match row.get(column) {
            Some(v) => v.clone(),
            None => model
                .find_property(column)
                .and_then(|p| p.evaluate(&self.shallow(model, id, row)))
                .unwrap_or(Value::Null),
        }
    }

    fn matches(&self, model: &ModelDef, id: i64, row: &Row, query: &ListQuery) -> bool {
        let filtered = query.filters.iter().all(|(column, value)| {
            if column == "id" {
                loose_eq(&Value::from(id), value)
            } else {
                row.get(column).is_some_and(|v| loose_eq(v, value))
            }
        });
        if !filtered {
            return false;
        }
        match &query.search {
            None => true,
            Some(pattern) => {
                let pattern = pattern.to_lowercase();
                id.to_string().contains(&pattern)
                    || model.scalar_fields().any(|f| {
                        row.get(&f.name)
                            .filter(|v| !v.is_null())
                            .is_some_and(|v| display(v).to_lowercase().contains(&pattern))
                    })
            }
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push((self.working.clone(), self.journal.len()));
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.pop().map(|_| ()).ok_or(StoreError::NoTransaction)
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let (tables, len) = self.savepoints.pop().ok_or(StoreError::NoTransaction)?;
        self.working = tables;
        self.journal.truncate(len);
        Ok(())
    }

    async fn list(&mut self, model: &str, query: &ListQuery) -> Result<Page, StoreError> {
        let def = self.model(model)?;
        let hits: Vec<(i64, &Row)> = self
            .working
            .rows
            .get(&def.table)
            .map(|rows| {
                rows.iter()
                    .filter(|(id, row)| self.matches(def, **id, row, query))
                    .map(|(id, row)| (*id, row))
                    .collect()
            })
            .unwrap_or_default();
        let mut hits: Vec<(i64, Value)> = hits
            .into_iter()
            .map(|(id, row)| (id, self.sort_key(def, id, row, &query.sort_by)))
            .collect();
        if query.sort_by != "id" {
            hits.sort_by(|(a_id, a), (b_id, b)| compare(a, b).then(a_id.cmp(b_id)));
        }
        let total = hits.len() as u64;
        let window: Vec<i64> = hits
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.page_length).unwrap_or(usize::MAX))
            .map(|(id, _)| id)
            .collect();
        let mut records = Vec::with_capacity(window.len());
        for id in window {
            if let Some(r) = self.load(def, id)? {
                records.push(r);
            }
        }
        Ok(Page { records, total })
    }

    async fn fetch(&mut self, model: &str, id: i64) -> Result<Option<Record>, StoreError> {
        let def = self.model(model)?;
        self.load(def, id)
    }

    async fn fetch_many(&mut self, model: &str, ids: &[i64]) -> Result<Vec<Record>, StoreError> {
        let def = self.model(model)?;
        let unique: BTreeSet<i64> = ids.iter().copied().collect();
        let mut out = Vec::new();
        for id in unique {
            if let Some(r) = self.load(def, id)? {
                out.push(r);
            }
        }
        Ok(out)
    }

    async fn save(&mut self, model: &str, record: &Record) -> Result<Record, StoreError> {
        let module = self.module.clone();
        let def = module
            .get(model)
            .filter(|m| m.storage)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;
        let (id, mut row) = match record.id {
            Some(id) => (id, self.row(&def.table, id).cloned().unwrap_or_default()),
            None => (self.next_id(&def.table)?, Row::new()),
        };
        let mut to_many = Vec::new();
        for field in &def.fields {
            match (&field.ty, record.get(&field.name)) {
                (FieldType::ToMany { target, link }, Some(Cell::Many(related))) => {
                    let ids: Vec<i64> = related.iter().filter_map(|r| r.id).collect();
                    to_many.push((target.clone(), link.clone(), ids));
                }
                (FieldType::Nested { foreign_key, .. }, Some(Cell::One(nested))) => {
                    let fk = nested.as_ref().and_then(|r| r.id).map_or(Value::Null, Value::from);
                    row.insert(foreign_key.clone(), fk);
                }
                (FieldType::Nested { foreign_key, .. }, Some(Cell::Value(v))) => {
                    row.insert(foreign_key.clone(), v.clone());
                }
                (ty, Some(Cell::Value(v))) if ty.is_scalar() => {
                    row.insert(field.name.clone(), v.clone());
                }
                (ty, None) if ty.is_scalar() => {
                    row.entry(field.name.clone()).or_insert(Value::Null);
                }
                _ => {}
            }
        }
        if let Some(field) = def
            .fields
            .iter()
            .find(|f| !f.nullable && f.ty.is_scalar() && row.get(&f.name).map_or(true, Value::is_null))
        {
            return Err(StoreError::Backend(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                field.name, def.table
            )));
        }
        self.check_unique(def, id, &row)?;
        let table = def.table.clone();
        self.put(&table, id, row);
        for (target, link, ids) in to_many {
            self.write_to_many(def, id, &target, &link, &ids)?;
        }
        self.load(def, id)?
            .ok_or_else(|| StoreError::Backend(format!("{} record {} vanished after save", def.table, id)))
    }

    async fn delete(&mut self, model: &str, id: i64) -> Result<bool, StoreError> {
        let module = self.module.clone();
        let def = self.model(model)?;
        if self.row(&def.table, id).is_none() {
            return Ok(false);
        }
        let table = def.table.clone();
        self.record(Op::Remove { table, id });
        // Dependent rows lose their reference; association pairs on either side are dropped.
        for other in module.models() {
            for field in &other.fields {
                match &field.ty {
                    FieldType::Nested { target, foreign_key } if target == model => {
                        self.clear_references(&other.table, foreign_key, id);
                    }
                    FieldType::ToMany { target, link: ToManyLink::BackReference { column } } if other.name == model => {
                        let target_table = match module.get(target) {
                            Some(t) => t.table.clone(),
                            None => continue,
                        };
                        self.clear_references(&target_table, column, id);
                    }
                    FieldType::ToMany { target, link: ToManyLink::Association { table, .. } } => {
                        let pairs: Vec<(i64, i64)> = self
                            .working
                            .links
                            .get(table)
                            .map(|p| {
                                p.iter()
                                    .filter(|(l, r)| (other.name == model && *l == id) || (target == model && *r == id))
                                    .copied()
                                    .collect()
                            })
                            .unwrap_or_default();
                        for pair in pairs {
                            self.record(Op::Unlink { table: table.clone(), pair });
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut shared = lock(&self.shared)?;
        let mut merged = shared.tables.clone();
        for op in &self.journal {
            merged.apply(op);
        }
        for op in &self.journal {
            let (Op::Insert { table, id, .. } | Op::Update { table, id, .. }) = op else {
                continue;
            };
            let (Some(model), Some(row)) = (
                self.module.models().find(|m| m.storage && &m.table == table),
                merged.rows.get(table).and_then(|rows| rows.get(id)),
            ) else {
                continue;
            };
            if let Err(e) = unique_clash(&merged, model, *id, row) {
                tracing::debug!(table = %table, id, "memory transaction conflicts with committed data");
                return Err(e);
            }
        }
        shared.tables = merged;
        tracing::debug!(ops = self.journal.len(), "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        tracing::debug!(ops = self.journal.len(), "memory transaction rolled back");
        Ok(())
    }
}

impl MemoryTx {
    fn clear_references(&mut self, table: &str, column: &str, id: i64) {
        let dependents: Vec<(i64, Row)> = self
            .working
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, row)| row.get(column).and_then(Value::as_i64) == Some(id))
                    .map(|(rid, row)| (*rid, row.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for (rid, mut row) in dependents {
            row.insert(column.to_string(), Value::Null);
            self.put(table, rid, row);
        }
    }
}

fn unique_clash(tables: &Tables, model: &ModelDef, id: i64, row: &Row) -> Result<(), StoreError> {
    let Some(rows) = tables.rows.get(&model.table) else {
        return Ok(());
    };
    for field in model.fields.iter().filter(|f| f.unique) {
        let Some(value) = row.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = rows
            .iter()
            .any(|(other, r)| *other != id && r.get(&field.name).is_some_and(|v| loose_eq(v, value)));
        if clash {
            return Err(StoreError::UniqueViolation {
                detail: Some(format!("Key ({})=({}) already exists.", field.name, display(value))),
            });
        }
    }
    Ok(())
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;
    use serde_json::json;

    fn module() -> Arc<SchemaModule> {
        Arc::new(
            SchemaModule::new("test")
                .with(
                    ModelDef::new("Parent", "parent")
                        .field(FieldDef::string("name").unique())
                        .field(FieldDef::has_many("children", "Child", "parent_id")),
                )
                .with(
                    ModelDef::new("Child", "child")
                        .field(FieldDef::string("name"))
                        .field(FieldDef::belongs_to("parent", "Parent", "parent_id")),
                ),
        )
    }

    fn named(model: &str, name: &str) -> Record {
        let mut r = Record::new(model);
        r.set_value("name", json!(name));
        r
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        let saved = tx.save("Parent", &named("Parent", "a")).await.unwrap();
        assert_eq!(saved.id, Some(1));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.fetch("Parent", 1).await.unwrap().is_some());
        tx.rollback().await.unwrap();
        assert_eq!(store.committed_count("parent").unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        tx.save("Parent", &named("Parent", "a")).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.committed_count("parent").unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_duplicate_fails_at_commit() {
        let store = MemoryStore::new(module());
        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        a.save("Parent", &named("Parent", "dup")).await.unwrap();
        b.save("Parent", &named("Parent", "dup")).await.unwrap();
        a.commit().await.unwrap();

        match b.commit().await {
            Err(StoreError::UniqueViolation { detail }) => {
                assert_eq!(detail.as_deref(), Some("Key (name)=(dup) already exists."))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.committed_count("parent").unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_updates_to_different_columns_both_land() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        let parent = tx.save("Parent", &named("Parent", "p")).await.unwrap();
        let child = tx.save("Child", &named("Child", "c")).await.unwrap();
        tx.commit().await.unwrap();
        let child_id = child.id.unwrap();

        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        let mut rename = Record::with_id("Child", child_id);
        rename.set_value("name", json!("renamed"));
        a.save("Child", &rename).await.unwrap();
        let mut adopt = Record::with_id("Child", child_id);
        adopt.set("parent", Cell::One(Some(Box::new(Record::with_id("Parent", parent.id.unwrap())))));
        b.save("Child", &adopt).await.unwrap();
        a.commit().await.unwrap();
        b.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let stored = tx.fetch("Child", child_id).await.unwrap().unwrap();
        assert_eq!(stored.value("name"), &json!("renamed"));
        assert_eq!(stored.attribute("parent"), Some(json!(parent.id.unwrap())));
    }

    #[tokio::test]
    async fn unique_violation_carries_postgres_style_detail() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        tx.save("Parent", &named("Parent", "dup")).await.unwrap();
        let err = tx.save("Parent", &named("Parent", "dup")).await.unwrap_err();
        match err {
            StoreError::UniqueViolation { detail } => {
                assert_eq!(detail.as_deref(), Some("Key (name)=(dup) already exists."))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn savepoint_rollback_restores_working_copy() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        tx.save("Parent", &named("Parent", "kept")).await.unwrap();
        tx.savepoint().await.unwrap();
        tx.save("Parent", &named("Parent", "dropped")).await.unwrap();
        tx.rollback_to_savepoint().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.committed_count("parent").unwrap(), 1);
    }

    #[tokio::test]
    async fn back_reference_is_written_through_owner() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        let c1 = tx.save("Child", &named("Child", "x")).await.unwrap();
        let c2 = tx.save("Child", &named("Child", "y")).await.unwrap();
        let mut parent = named("Parent", "p");
        parent.set("children", Cell::Many(vec![c1.clone(), c2.clone()]));
        let parent = tx.save("Parent", &parent).await.unwrap();
        assert_eq!(parent.related_ids("children"), vec![c1.id.unwrap(), c2.id.unwrap()]);

        let child = tx.fetch("Child", c1.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(child.attribute("parent"), parent.id.map(Value::from));

        let page = tx
            .list("Child", &ListQuery::default().filter("parent_id", json!(parent.id)))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn list_paginates_searches_and_sorts() {
        let store = MemoryStore::new(module());
        let mut tx = store.begin().await.unwrap();
        for name in ["delta", "Alpha", "charlie", "bravo", "alphabet"] {
            tx.save("Parent", &named("Parent", name)).await.unwrap();
        }
        let q = ListQuery { page_length: 2, ..ListQuery::default() }.sort_by("name");
        let page = tx.list("Parent", &q).await.unwrap();
        assert_eq!(page.total, 5);
        let names: Vec<_> = page.records.iter().map(|r| r.value("name").clone()).collect();
        assert_eq!(names, vec![json!("Alpha"), json!("alphabet")]);

        let page = tx.list("Parent", &ListQuery::default().search("ALPHA")).await.unwrap();
        assert_eq!(page.total, 2);

        let beyond = ListQuery { page: 9, page_length: 2, ..ListQuery::default() };
        let page = tx.list("Parent", &beyond).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 5);

        tx.save("Parent", &named("Parent", "50% off")).await.unwrap();
        let page = tx.list("Parent", &ListQuery::default().search("%")).await.unwrap();
        assert_eq!(page.total, 1);

        let far = ListQuery { page: u64::MAX, page_length: 1000, ..ListQuery::default() };
        let page = tx.list("Parent", &far).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 6);
    }
}
