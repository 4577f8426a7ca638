//! Demo server: exposes a Parent/Child schema. Uses PostgreSQL when `DATABASE_URL` is set (creating
//! the database and tables if needed), otherwise an in-memory store.

use autorest::{
    autoconfigure, create_all, ensure_database_exists, ApiModel, ApiSettings, AppState, ComputedProperty,
    CustomEndpoint, ExposureOverrides, FieldDef, FieldType, LinkTemplate, ListQuery, MemoryStore, ModelDef,
    PgStore, SchemaModule, Store,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

struct Parent;

impl ApiModel for Parent {
    fn model_def() -> ModelDef {
        ModelDef::new("Parent", "parent")
            .field(FieldDef::string("name").unique())
            .field(FieldDef::has_many("children", "Child", "parent_id"))
            .property(
                ComputedProperty::new("child_count")
                    .returns(FieldType::Integer)
                    .expression("(SELECT COUNT(*) FROM child WHERE child.parent_id = parent.id)"),
            )
            .exposed(
                ExposureOverrides::new()
                    .link(LinkTemplate::new("child-list-detailed", "list children", "GET").bind("parent_id", "id"))
                    .custom_endpoint(CustomEndpoint::new(
                        "named",
                        "Parent",
                        "Parents whose name contains `q`",
                        named,
                    )),
            )
    }
}

fn named(args: &BTreeMap<String, String>) -> Result<ListQuery, String> {
    let q = args.get("q").ok_or("missing `q`")?;
    Ok(ListQuery::default().search(q.clone()))
}

struct Child;

impl ApiModel for Child {
    fn model_def() -> ModelDef {
        ModelDef::new("Child", "child")
            .field(FieldDef::string("name"))
            .field(FieldDef::integer("age"))
            .field(FieldDef::date("born"))
            .field(FieldDef::belongs_to("parent", "Parent", "parent_id"))
            .property(ComputedProperty::new("kind").returns(FieldType::String).unbound_getter(kind))
            .exposed(ExposureOverrides::new().alias("child").queryable("mother", "parent"))
    }
}

fn kind() -> Value {
    json!("child")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autorest=info,server=info")),
        )
        .init();

    let module = Arc::new(SchemaModule::new("demo").register::<Parent>().register::<Child>());
    let settings = ApiSettings::from_env();

    let store: Arc<dyn Store> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            ensure_database_exists(&database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;
            create_all(&pool, &module).await?;
            Arc::new(PgStore::new(pool, module.clone()))
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set; using in-memory store");
            Arc::new(MemoryStore::new(module.clone()))
        }
    };

    let state = AppState::new(store, module, settings)?;
    let app = autoconfigure(state)?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
