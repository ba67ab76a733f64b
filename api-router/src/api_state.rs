use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use connector_runtime::SyncCoordinator;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub coordinator: Arc<SyncCoordinator>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            db,
            config,
            coordinator,
        }
    }
}
