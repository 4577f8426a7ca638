//! Storage collaborator: transactional access to model records.
//!
//! Records are addressed by model name; each store holds the [`SchemaModule`](crate::model::SchemaModule)
//! it serves so it can resolve tables, columns and relationships.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use crate::model::Record;
use async_trait::async_trait;
use serde_json::Value;

/// Filter, search, sort and pagination window for a list query.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    /// Equality filters on stored columns (scalar field names or foreign-key columns).
    pub filters: Vec<(String, Value)>,
    /// Case-insensitive substring matched against every scalar column, OR-combined.
    pub search: Option<String>,
    pub sort_by: String,
    /// 1-based.
    pub page: u64,
    pub page_length: u64,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            filters: Vec::new(),
            search: None,
            sort_by: "id".into(),
            page: 1,
            page_length: crate::config::DEFAULT_PAGE_LENGTH,
        }
    }
}

impl ListQuery {
    pub fn filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push((column.into(), value));
        self
    }

    pub fn search(mut self, pattern: impl Into<String>) -> Self {
        self.search = Some(pattern.into());
        self
    }

    pub fn sort_by(mut self, column: impl Into<String>) -> Self {
        self.sort_by = column.into();
        self
    }

    /// Rows skipped before the window, clamped to what a SQL `bigint` can hold.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.page_length)
            .min(i64::MAX as u64)
    }
}

/// One window of results plus the unpaginated match count.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. It stays open until committed or rolled back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Connectivity check used by the readiness route.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// An open transaction. Savepoints nest; each `savepoint` must be matched by a release or a rollback.
#[async_trait]
pub trait StoreTx: Send {
    async fn savepoint(&mut self) -> Result<(), StoreError>;
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    async fn list(&mut self, model: &str, query: &ListQuery) -> Result<Page, StoreError>;
    async fn fetch(&mut self, model: &str, id: i64) -> Result<Option<Record>, StoreError>;
    /// Records whose id is in `ids`; missing ids are simply absent from the result.
    async fn fetch_many(&mut self, model: &str, ids: &[i64]) -> Result<Vec<Record>, StoreError>;
    /// Insert when `record.id` is None, update otherwise. Returns the stored record, relationships loaded.
    async fn save(&mut self, model: &str, record: &Record) -> Result<Record, StoreError>;
    /// Returns false when no such record exists.
    async fn delete(&mut self, model: &str, id: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
