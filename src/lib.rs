//! Autorest SDK: declarative REST API generation over relational models.

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod link;
pub mod migration;
pub mod model;
pub mod registrar;
pub mod response;
pub mod routes;
pub mod service;
pub mod session;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{expose, ApiSettings, CustomEndpoint, ExposureConfig, ExposureOverrides};
pub use error::{ApiError, ConfigError, StoreError};
pub use link::{LinkTemplate, RouteTable};
pub use migration::create_all;
pub use model::{ApiModel, ComputedProperty, FieldDef, FieldType, ModelDef, Record, SchemaModule};
pub use response::{wrap_page, wrap_result, Envelope, Pagination};
pub use routes::autoconfigure;
pub use service::CrudService;
pub use session::{MutationLog, SessionManager};
pub use state::AppState;
pub use store::{ensure_database_exists, ListQuery, MemoryStore, PgStore, Store};
