//! PostgreSQL backend over a sqlx pool. One pooled connection per transaction; nested scopes
//! are `SAVEPOINT`s.

use crate::error::StoreError;
use crate::model::{Cell, FieldType, ModelDef, Record, SchemaModule, ToManyLink};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::{ListQuery, Page, Store, StoreTx};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{ConnectOptions, PgPool, Postgres, Row, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    module: Arc<SchemaModule>,
}

impl PgStore {
    pub fn new(pool: PgPool, module: Arc<SchemaModule>) -> Self {
        PgStore { pool, module }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            module: self.module.clone(),
            depth: 0,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
    module: Arc<SchemaModule>,
    depth: usize,
}

impl PgTx {
    fn model(&self, name: &str) -> Result<ModelDef, StoreError> {
        self.module
            .get(name)
            .filter(|m| m.storage)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.execute(&mut *self.tx).await?.rows_affected())
    }

    async fn query_many(&mut self, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.fetch_all(&mut *self.tx).await?)
    }

    async fn query_id(&mut self, q: &QueryBuf) -> Result<Option<i64>, StoreError> {
        let rows = self.query_many(q).await?;
        Ok(rows.first().map(|r| r.try_get::<i64, _>(0)).transpose()?)
    }

    /// Records with scalar cells and computed expression values only.
    fn shallow(model: &ModelDef, row: &PgRow) -> Result<Record, StoreError> {
        let id: i64 = row.try_get("id")?;
        let mut record = Record::with_id(model.name.clone(), id);
        for field in model.scalar_fields() {
            record.set_value(field.name.clone(), cell_to_value(row, &field.name));
        }
        for prop in model.api_properties().filter(|p| p.has_expression()) {
            record.set_value(prop.name.clone(), cell_to_value(row, &prop.name));
        }
        Ok(record)
    }

    async fn shallow_by_ids(&mut self, model: &ModelDef, ids: &[i64]) -> Result<HashMap<i64, Record>, StoreError> {
        let values: Vec<Value> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().map(Value::from).collect();
        let q = sql::select_by_column_in(model, "id", &values, false);
        let rows = self.query_many(&q).await?;
        let mut out = HashMap::new();
        for row in &rows {
            let r = Self::shallow(model, row)?;
            if let Some(id) = r.id {
                out.insert(id, r);
            }
        }
        Ok(out)
    }

    /// Turn rows into records with one level of relationships: one query per relationship field.
    async fn load(&mut self, model: &ModelDef, rows: Vec<PgRow>) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::with_capacity(rows.len());
        let mut foreign_keys: HashMap<String, Vec<Option<i64>>> = HashMap::new();
        for row in &rows {
            records.push(Self::shallow(model, row)?);
            for field in &model.fields {
                if let FieldType::Nested { foreign_key, .. } = &field.ty {
                    let fk: Option<i64> = row.try_get(foreign_key.as_str())?;
                    foreign_keys.entry(field.name.clone()).or_default().push(fk);
                }
            }
        }
        let owners: Vec<i64> = records.iter().filter_map(|r| r.id).collect();

        for field in &model.fields {
            match &field.ty {
                FieldType::Nested { target, .. } => {
                    let target = self.model(target)?;
                    let fks = foreign_keys.remove(&field.name).unwrap_or_default();
                    let ids: Vec<i64> = fks.iter().flatten().copied().collect();
                    let related = self.shallow_by_ids(&target, &ids).await?;
                    for (record, fk) in records.iter_mut().zip(fks) {
                        let nested = fk.and_then(|id| related.get(&id).cloned()).map(Box::new);
                        record.set(field.name.clone(), Cell::One(nested));
                    }
                }
                FieldType::ToMany { target, link } => {
                    let target = self.model(target)?;
                    let q = match link {
                        ToManyLink::BackReference { column } => sql::select_pairs(&target.table, column, "id", &owners),
                        ToManyLink::Association { table, local, remote } => {
                            sql::select_pairs(table, local, remote, &owners)
                        }
                    };
                    let mut pairs: HashMap<i64, Vec<i64>> = HashMap::new();
                    for row in self.query_many(&q).await? {
                        let owner: Option<i64> = row.try_get(0)?;
                        let related: Option<i64> = row.try_get(1)?;
                        if let (Some(o), Some(r)) = (owner, related) {
                            pairs.entry(o).or_default().push(r);
                        }
                    }
                    let all: Vec<i64> = pairs.values().flatten().copied().collect();
                    let related = self.shallow_by_ids(&target, &all).await?;
                    for record in records.iter_mut() {
                        let ids = record.id.and_then(|id| pairs.get(&id)).cloned().unwrap_or_default();
                        let many = ids.iter().filter_map(|id| related.get(id).cloned()).collect();
                        record.set(field.name.clone(), Cell::Many(many));
                    }
                }
                _ => {}
            }
        }
        Ok(records)
    }

    async fn load_one(&mut self, model: &ModelDef, id: i64) -> Result<Option<Record>, StoreError> {
        let q = sql::select_by_column_in(model, "id", &[Value::from(id)], true);
        let rows = self.query_many(&q).await?;
        Ok(self.load(model, rows).await?.pop())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.depth += 1;
        let sql = format!("SAVEPOINT sp_{}", self.depth);
        tracing::debug!(sql = %sql, "query (tx)");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoTransaction);
        }
        let sql = format!("RELEASE SAVEPOINT sp_{}", self.depth);
        self.depth -= 1;
        tracing::debug!(sql = %sql, "query (tx)");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoTransaction);
        }
        let sql = format!("ROLLBACK TO SAVEPOINT sp_{}", self.depth);
        self.depth -= 1;
        tracing::debug!(sql = %sql, "query (tx)");
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn list(&mut self, model: &str, query: &ListQuery) -> Result<Page, StoreError> {
        let def = self.model(model)?;
        let q = sql::count(&def, query);
        let total: i64 = {
            let rows = self.query_many(&q).await?;
            rows.first().map(|r| r.try_get::<i64, _>(0)).transpose()?.unwrap_or(0)
        };
        let total = u64::try_from(total).unwrap_or(0);
        if query.offset() >= total {
            return Ok(Page { records: Vec::new(), total });
        }
        let q = sql::select_list(&def, query);
        let rows = self.query_many(&q).await?;
        let records = self.load(&def, rows).await?;
        Ok(Page { records, total })
    }

    async fn fetch(&mut self, model: &str, id: i64) -> Result<Option<Record>, StoreError> {
        let def = self.model(model)?;
        self.load_one(&def, id).await
    }

    async fn fetch_many(&mut self, model: &str, ids: &[i64]) -> Result<Vec<Record>, StoreError> {
        let def = self.model(model)?;
        let values: Vec<Value> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().map(Value::from).collect();
        let q = sql::select_by_column_in(&def, "id", &values, true);
        let rows = self.query_many(&q).await?;
        self.load(&def, rows).await
    }

    async fn save(&mut self, model: &str, record: &Record) -> Result<Record, StoreError> {
        let def = self.model(model)?;
        let mut row = Map::new();
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
                _ => {}
            }
        }
        let id = match record.id {
            None => self.query_id(&sql::insert(&def, &row)).await?,
            Some(id) => self.query_id(&sql::update(&def, id, &row)).await?,
        }
        .ok_or_else(|| StoreError::Backend(format!("{} record {:?} not found for update", def.table, record.id)))?;

        for (target, link, ids) in to_many {
            let statements = match &link {
                ToManyLink::BackReference { column } => {
                    let target_table = self.model(&target)?.table;
                    sql::reassign_back_reference(&target_table, column, id, &ids)
                }
                ToManyLink::Association { table, local, remote } => sql::replace_associations(table, local, remote, id, &ids),
            };
            for q in &statements {
                self.execute(q).await?;
            }
        }
        self.load_one(&def, id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("{} record {} vanished after save", def.table, id)))
    }

    async fn delete(&mut self, model: &str, id: i64) -> Result<bool, StoreError> {
        let def = self.model(model)?;
        for field in &def.fields {
            if let FieldType::ToMany { link: ToManyLink::Association { table, local, remote }, .. } = &field.ty {
                for q in sql::replace_associations(table, local, remote, id, &[]) {
                    self.execute(&q).await?;
                }
            }
        }
        Ok(self.execute(&sql::delete(&def, id)).await? > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StoreError::Backend(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Backend("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_split_from_url() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/shop?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "shop");
    }
}
