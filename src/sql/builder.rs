//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and relationship statements for a model.

use crate::model::{FieldType, ModelDef};
use crate::store::ListQuery;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from model definitions).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a parameter and return its placeholder with an explicit cast.
    fn placeholder(&mut self, v: Value, cast: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, cast)
    }
}

/// SQL type of a stored column for a field type. Relationship columns are ids.
pub fn pg_type(ty: &FieldType) -> &'static str {
    match ty {
        FieldType::String => "text",
        FieldType::Bool => "boolean",
        FieldType::Integer | FieldType::Nested { .. } | FieldType::ToMany { .. } => "bigint",
        FieldType::Float => "double precision",
        FieldType::Date => "date",
        FieldType::DateTime => "timestamptz",
    }
}

/// Stored column name and cast for a field: scalars by name, to-one relations by foreign key.
pub fn stored_column(field_ty: &FieldType, name: &str) -> Option<(String, &'static str)> {
    match field_ty {
        FieldType::Nested { foreign_key, .. } => Some((foreign_key.clone(), "bigint")),
        FieldType::ToMany { .. } => None,
        ty => Some((name.to_string(), pg_type(ty))),
    }
}

fn column_cast(model: &ModelDef, column: &str) -> &'static str {
    if column == "id" {
        return "bigint";
    }
    model
        .fields
        .iter()
        .find_map(|f| match stored_column(&f.ty, &f.name) {
            Some((c, cast)) if c == column => Some(cast),
            _ => None,
        })
        .unwrap_or("text")
}

/// `id`, stored columns, and query-level computed expressions aliased to their property name.
fn select_column_list(model: &ModelDef, with_expressions: bool) -> String {
    let mut cols = vec![quoted("id")];
    for f in &model.fields {
        if let Some((column, _)) = stored_column(&f.ty, &f.name) {
            cols.push(quoted(&column));
        }
    }
    if with_expressions {
        for p in model.api_properties() {
            if let Some(expr) = &p.expression {
                cols.push(format!("({}) AS {}", expr, quoted(&p.name)));
            }
        }
    }
    cols.join(", ")
}

fn where_clause(model: &ModelDef, query: &ListQuery, q: &mut QueryBuf) -> String {
    let mut parts = Vec::new();
    for (column, value) in &query.filters {
        let ph = q.placeholder(value.clone(), column_cast(model, column));
        parts.push(format!("{} = {}", quoted(column), ph));
    }
    if let Some(pattern) = &query.search {
        let ph = q.placeholder(Value::String(format!("%{}%", escape_like(pattern))), "text");
        let mut ors = vec![format!("CAST({} AS TEXT) ILIKE {}", quoted("id"), ph)];
        for f in model.scalar_fields() {
            ors.push(format!("CAST({} AS TEXT) ILIKE {}", quoted(&f.name), ph));
        }
        parts.push(format!("({})", ors.join(" OR ")));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// Escape `LIKE` wildcards so the search term matches literally (backslash is the default
/// escape character).
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Paginated SELECT with equality filters, free-text search and ordering (ties broken by id).
pub fn select_list(model: &ModelDef, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(model, query, &mut q);
    let order_clause = if query.sort_by == "id" {
        format!(" ORDER BY {}", quoted("id"))
    } else {
        format!(" ORDER BY {}, {}", quoted(&query.sort_by), quoted("id"))
    };
    q.sql = format!(
        "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
        select_column_list(model, true),
        quoted(&model.table),
        where_clause,
        order_clause,
        query.page_length,
        query.offset()
    );
    q
}

/// COUNT(*) over the same filters and search as [`select_list`], ignoring the window.
pub fn count(model: &ModelDef, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(model, query, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", quoted(&model.table), where_clause);
    q
}

/// SELECT rows WHERE column IN ($1, $2, ...) ORDER BY id. Used for batch-fetching related rows.
pub fn select_by_column_in(model: &ModelDef, column_name: &str, values: &[Value], with_expressions: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(model, with_expressions);
    let table = quoted(&model.table);
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} WHERE 1 = 0", cols, table);
        return q;
    }
    let cast = column_cast(model, column_name);
    let placeholders: Vec<String> = values.iter().map(|v| q.placeholder(v.clone(), cast)).collect();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        cols,
        table,
        quoted(column_name),
        placeholders.join(", "),
        quoted("id")
    );
    q
}

/// INSERT of the given stored columns. Returns the new id.
pub fn insert(model: &ModelDef, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (column, value) in row {
        placeholders.push(q.placeholder(value.clone(), column_cast(model, column)));
        cols.push(quoted(column));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quoted(&model.table), quoted("id"))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted(&model.table),
            cols.join(", "),
            placeholders.join(", "),
            quoted("id")
        )
    };
    q
}

/// UPDATE by id: SET only the given stored columns. Returns the id when the row exists.
pub fn update(model: &ModelDef, id: i64, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(&model.table);
    let sets: Vec<String> = row
        .iter()
        .filter(|(column, _)| column.as_str() != "id")
        .map(|(column, value)| {
            let ph = q.placeholder(value.clone(), column_cast(model, column));
            format!("{} = {}", quoted(column), ph)
        })
        .collect();
    let id_ph = q.placeholder(Value::from(id), "bigint");
    q.sql = if sets.is_empty() {
        format!("SELECT {} FROM {} WHERE {} = {}", quoted("id"), table, quoted("id"), id_ph)
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
            table,
            sets.join(", "),
            quoted("id"),
            id_ph,
            quoted("id")
        )
    };
    q
}

/// DELETE by id.
pub fn delete(model: &ModelDef, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(Value::from(id), "bigint");
    q.sql = format!("DELETE FROM {} WHERE {} = {}", quoted(&model.table), quoted("id"), ph);
    q
}

/// `(owner, related)` id pairs of a to-many relationship for the given owners.
pub fn select_pairs(table: &str, owner_column: &str, related_column: &str, owners: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let placeholders: Vec<String> = owners
        .iter()
        .map(|id| q.placeholder(Value::from(*id), "bigint"))
        .collect();
    q.sql = if placeholders.is_empty() {
        "SELECT NULL::bigint, NULL::bigint WHERE 1 = 0".to_string()
    } else {
        format!(
            "SELECT {}, {} FROM {} WHERE {} IN ({}) ORDER BY {}",
            quoted(owner_column),
            quoted(related_column),
            quoted(table),
            quoted(owner_column),
            placeholders.join(", "),
            quoted(related_column)
        )
    };
    q
}

/// Point `column` of the listed rows at `owner` and detach every other row that pointed at it.
pub fn reassign_back_reference(table: &str, column: &str, owner: i64, related: &[i64]) -> Vec<QueryBuf> {
    let mut detach = QueryBuf::new();
    let owner_ph = detach.placeholder(Value::from(owner), "bigint");
    detach.sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {}",
        quoted(table),
        quoted(column),
        quoted(column),
        owner_ph
    );
    if related.is_empty() {
        return vec![detach];
    }
    let mut attach = QueryBuf::new();
    let owner_ph = attach.placeholder(Value::from(owner), "bigint");
    let ids: Vec<String> = related
        .iter()
        .map(|id| attach.placeholder(Value::from(*id), "bigint"))
        .collect();
    attach.sql = format!(
        "UPDATE {} SET {} = {} WHERE {} IN ({})",
        quoted(table),
        quoted(column),
        owner_ph,
        quoted("id"),
        ids.join(", ")
    );
    vec![detach, attach]
}

/// Replace the association rows of `owner` with `(owner, related)` pairs.
pub fn replace_associations(table: &str, local: &str, remote: &str, owner: i64, related: &[i64]) -> Vec<QueryBuf> {
    let mut clear = QueryBuf::new();
    let owner_ph = clear.placeholder(Value::from(owner), "bigint");
    clear.sql = format!("DELETE FROM {} WHERE {} = {}", quoted(table), quoted(local), owner_ph);
    let mut out = vec![clear];
    for id in related {
        let mut add = QueryBuf::new();
        let l = add.placeholder(Value::from(owner), "bigint");
        let r = add.placeholder(Value::from(*id), "bigint");
        add.sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING",
            quoted(table),
            quoted(local),
            quoted(remote),
            l,
            r
        );
        out.push(add);
    }
    out
}
