//! Shared application state for all routes.

use crate::config::{ApiSettings, CustomEndpoint, ExposureConfig};
use crate::error::ConfigError;
use crate::link::RouteTable;
use crate::model::{ModelDef, SchemaModule};
use crate::registrar::{Namespace, SchemaTriple};
use crate::session::SessionManager;
use crate::store::Store;
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub module: Arc<SchemaModule>,
    /// Every synthesized endpoint, so links can target any model's routes.
    pub routes: Arc<RouteTable>,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, module: Arc<SchemaModule>, settings: ApiSettings) -> Result<Self, ConfigError> {
        let routes = RouteTable::build(&module, &settings)?;
        let sessions = SessionManager::new(store.clone(), settings.session_timeout);
        Ok(AppState {
            store,
            sessions: Arc::new(sessions),
            module,
            routes: Arc::new(routes),
            settings: Arc::new(settings),
        })
    }
}

/// State behind one model's generated routes.
#[derive(Clone)]
pub struct ModelState {
    pub app: AppState,
    pub model: Arc<ModelDef>,
    /// Namespace the model's wire schemas were registered in.
    pub namespace: Arc<Namespace>,
    pub schemas: SchemaTriple,
}

impl ModelState {
    pub fn alias(&self) -> &str {
        &self.namespace.name
    }

    pub fn exposure(&self) -> Result<&ExposureConfig, ConfigError> {
        self.model.exposure()
    }
}

/// State behind one author-declared custom endpoint.
#[derive(Clone)]
pub struct CustomState {
    pub owner: ModelState,
    pub endpoint: CustomEndpoint,
    pub target: Arc<ModelDef>,
    /// Name the target's full-record schema is registered under in the owner's namespace.
    pub target_schema: String,
}

impl FromRef<AppState> for Arc<ApiSettings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}

impl FromRef<ModelState> for Arc<ApiSettings> {
    fn from_ref(state: &ModelState) -> Self {
        state.app.settings.clone()
    }
}

impl FromRef<CustomState> for Arc<ApiSettings> {
    fn from_ref(state: &CustomState) -> Self {
        state.owner.app.settings.clone()
    }
}
