use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::{source::SourceType, sync_run::SyncType},
};

use crate::context::SyncContext;

/// The contract every source connector implements. A single connector may
/// serve several source types (the Microsoft connector hosts OneDrive,
/// Outlook, Calendar and SharePoint behind one `sync`, dispatching on
/// `ctx.source_type()`).
///
/// A well-behaved `sync` finalizes the run itself through `ctx.complete` or
/// `ctx.fail`; returning `Err` is the unhandled-exception path and the runtime
/// turns it into a failed run.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn sync_modes(&self) -> &[SyncType];

    async fn sync(
        &self,
        source_config: serde_json::Value,
        credentials: serde_json::Value,
        state: Option<serde_json::Value>,
        ctx: SyncContext,
    ) -> Result<(), AppError>;
}

/// Maps source types onto the connector serving them.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<SourceType, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_type: SourceType, connector: Arc<dyn Connector>) {
        self.connectors.insert(source_type, connector);
    }

    pub fn resolve(&self, source_type: SourceType) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&source_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
