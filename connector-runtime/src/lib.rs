#![allow(clippy::missing_docs_in_private_items)]

pub mod connector;
pub mod context;
pub mod coordinator;

pub use connector::{Connector, ConnectorRegistry};
pub use context::{SyncContext, CHECKPOINT_INTERVAL};
pub use coordinator::SyncCoordinator;
