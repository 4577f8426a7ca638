//! Create the tables of a schema module: one table per storage model, foreign-key columns for
//! to-one and one-to-many relationships, and association tables for many-to-many relationships.
//! Every statement is idempotent (`IF NOT EXISTS`); existing tables are never altered beyond
//! adding missing relationship columns.

use crate::config::validate;
use crate::error::{ConfigError, StoreError};
use crate::model::{FieldType, SchemaModule, ToManyLink};
use crate::sql::{pg_type, quoted};
use sqlx::PgPool;
use std::collections::HashSet;

/// DDL statements for `module`, in dependency order.
pub fn ddl(module: &SchemaModule) -> Result<Vec<String>, ConfigError> {
    validate(module)?;
    let table_of = |name: &str| -> Result<String, ConfigError> {
        module
            .get(name)
            .filter(|m| m.storage)
            .map(|m| m.table.clone())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "storage model",
                id: name.to_string(),
            })
    };

    let mut statements = Vec::new();
    for model in module.models().filter(|m| m.storage) {
        let mut cols = vec![format!("{} BIGSERIAL PRIMARY KEY", quoted("id"))];
        for field in model.scalar_fields() {
            let mut def = format!("{} {}", quoted(&field.name), pg_type(&field.ty).to_uppercase());
            if !field.nullable {
                def.push_str(" NOT NULL");
            }
            if field.unique {
                def.push_str(" UNIQUE");
            }
            cols.push(def);
        }
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quoted(&model.table),
            cols.join(",\n    ")
        ));
    }

    let mut fk_columns: HashSet<(String, String)> = HashSet::new();
    let mut add_fk = |statements: &mut Vec<String>, table: String, column: &str, references: String, required: bool| {
        if fk_columns.insert((table.clone(), column.to_string())) {
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} BIGINT{} REFERENCES {} ({}) ON DELETE {}",
                quoted(&table),
                quoted(column),
                if required { " NOT NULL" } else { "" },
                quoted(&references),
                quoted("id"),
                if required { "CASCADE" } else { "SET NULL" }
            ));
        }
    };
    let mut association_tables = HashSet::new();
    for model in module.models().filter(|m| m.storage) {
        for field in &model.fields {
            match &field.ty {
                FieldType::Nested { target, foreign_key } => {
                    add_fk(&mut statements, model.table.clone(), foreign_key, table_of(target)?, !field.nullable);
                }
                FieldType::ToMany { target, link: ToManyLink::BackReference { column } } => {
                    add_fk(&mut statements, table_of(target)?, column, model.table.clone(), false);
                }
                FieldType::ToMany { target, link: ToManyLink::Association { table, local, remote } } => {
                    if !association_tables.insert(table.clone()) {
                        continue;
                    }
                    statements.push(format!(
                        "CREATE TABLE IF NOT EXISTS {} (\n    {} BIGINT NOT NULL REFERENCES {} ({}) ON DELETE CASCADE,\n    \
                         {} BIGINT NOT NULL REFERENCES {} ({}) ON DELETE CASCADE,\n    PRIMARY KEY ({}, {})\n)",
                        quoted(table),
                        quoted(local),
                        quoted(&model.table),
                        quoted("id"),
                        quoted(remote),
                        quoted(&table_of(target)?),
                        quoted("id"),
                        quoted(local),
                        quoted(remote)
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(statements)
}

/// Create every table of `module` that does not exist yet.
pub async fn create_all(pool: &PgPool, module: &SchemaModule) -> Result<(), StoreError> {
    let statements = ddl(module).map_err(|e| StoreError::Backend(e.to_string()))?;
    for sql in &statements {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!(module = %module.name, statements = statements.len(), "schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, ModelDef};

    fn module() -> SchemaModule {
        SchemaModule::new("app")
            .with(
                ModelDef::new("Parent", "parent")
                    .field(FieldDef::string("name").unique().required())
                    .field(FieldDef::has_many("children", "Child", "parent_id"))
                    .field(FieldDef::many_to_many("tags", "Tag", "parent_tag", "parent_id", "tag_id")),
            )
            .with(
                ModelDef::new("Child", "child")
                    .field(FieldDef::string("name"))
                    .field(FieldDef::belongs_to("parent", "Parent", "parent_id")),
            )
            .with(ModelDef::new("Tag", "tag").field(FieldDef::string("label")))
    }

    #[test]
    fn tables_precede_relationship_columns() {
        let ddl = ddl(&module()).unwrap();
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS \"parent\""));
        assert!(ddl[0].contains("\"name\" TEXT NOT NULL UNIQUE"));
        assert_eq!(ddl.iter().filter(|s| s.starts_with("CREATE TABLE")).count(), 4);
        let fk: Vec<_> = ddl.iter().filter(|s| s.contains("\"parent_id\" BIGINT REFERENCES")).collect();
        assert_eq!(fk.len(), 1, "shared back-reference column is added once");
        assert!(ddl.last().unwrap().contains("PRIMARY KEY (\"parent_id\", \"tag_id\")"));
    }

    #[test]
    fn dangling_target_is_a_config_error() {
        let broken = SchemaModule::new("app")
            .with(ModelDef::new("Child", "child").field(FieldDef::belongs_to("parent", "Parent", "parent_id")));
        assert!(ddl(&broken).is_err());
    }
}
