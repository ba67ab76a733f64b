use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
};

use common::{
    error::AppError,
    storage::{
        content::ContentStore,
        db::SurrealDbClient,
        types::{
            source::Source,
            sync_run::{SyncRun, SyncType},
        },
    },
};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{connector::ConnectorRegistry, context::SyncContext};

struct RunningSync {
    sync_run_id: String,
    cancel: Arc<AtomicBool>,
}

/// Initiates, tracks and cancels sync runs. A source has at most one running
/// sync at a time; a second request while one is in flight is rejected.
pub struct SyncCoordinator {
    db: Arc<SurrealDbClient>,
    content: ContentStore,
    registry: ConnectorRegistry,
    running: Arc<Mutex<HashMap<String, RunningSync>>>,
}

impl SyncCoordinator {
    pub fn new(db: Arc<SurrealDbClient>, content: ContentStore, registry: ConnectorRegistry) -> Self {
        Self {
            db,
            content,
            registry,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve the connector, create the `SyncRun` row and launch the sync as
    /// an independent task. Returns the new run id.
    pub async fn start_sync(
        &self,
        source_id: &str,
        sync_type: SyncType,
    ) -> Result<String, AppError> {
        let source: Source = self
            .db
            .get_item(source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source {source_id}")))?;

        let connector = self.registry.resolve(source.source_type).ok_or_else(|| {
            AppError::Validation(format!(
                "no connector registered for source type {:?}",
                source.source_type
            ))
        })?;

        if !connector.sync_modes().contains(&sync_type) {
            return Err(AppError::Validation(format!(
                "connector {} does not support {:?} syncs",
                connector.name(),
                sync_type
            )));
        }

        let mut running = self.running.lock().await;
        if running.contains_key(source_id) {
            return Err(AppError::Conflict(format!(
                "a sync is already running for source {source_id}"
            )));
        }
        // Restart safety: a run left `running` by a crashed process also
        // blocks, so an operator sees it before doubling up.
        if SyncRun::has_running_for_source(source_id, &self.db).await? {
            return Err(AppError::Conflict(format!(
                "a sync is already running for source {source_id}"
            )));
        }

        let run = SyncRun::create(source_id, sync_type, &self.db).await?;
        let cancel = Arc::new(AtomicBool::new(false));
        running.insert(
            source_id.to_owned(),
            RunningSync {
                sync_run_id: run.id.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(running);

        let ctx = SyncContext::new(
            self.db.clone(),
            self.content.clone(),
            run.id.clone(),
            source_id.to_owned(),
            source.source_type,
            cancel,
        );

        info!(
            sync_run_id = %run.id,
            source_id,
            connector = connector.name(),
            ?sync_type,
            "starting sync"
        );

        let running_map = Arc::clone(&self.running);
        let source_key = source_id.to_owned();
        tokio::spawn(async move {
            let result = connector
                .sync(source.config, source.credentials, source.connector_state, ctx.clone())
                .await;

            // The unhandled-exception path: the connector bailed without
            // finalizing the run.
            match result {
                Ok(()) if !ctx.is_finalized() => {
                    error!(sync_run_id = %ctx.sync_run_id(), "connector returned without finalizing");
                    if let Err(err) = ctx.fail("Connector ended without finalizing the sync").await {
                        error!(error = %err, "failed to finalize abandoned sync run");
                    }
                }
                Err(err) if !ctx.is_finalized() => {
                    if let Err(mark_err) = ctx.fail(&err.to_string()).await {
                        error!(error = %mark_err, "failed to finalize errored sync run");
                    }
                }
                _ => {}
            }

            running_map.lock().await.remove(&source_key);
        });

        Ok(run.id)
    }

    /// Signal cooperative cancellation for a running sync. Returns false when
    /// no live sync matches the run id.
    pub async fn cancel(&self, sync_run_id: &str) -> bool {
        let running = self.running.lock().await;
        for sync in running.values() {
            if sync.sync_run_id == sync_run_id {
                sync.cancel.store(true, Ordering::SeqCst);
                info!(sync_run_id, "cancellation requested");
                return true;
            }
        }

        false
    }

    pub async fn status(&self, sync_run_id: &str) -> Result<SyncRun, AppError> {
        self.db
            .get_item(sync_run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("sync run {sync_run_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::context::CHECKPOINT_INTERVAL;
    use async_trait::async_trait;
    use common::storage::store::StorageManager;
    use common::storage::types::document::{
        DocumentMetadata, DocumentPermissions, NewDocument,
    };
    use common::storage::types::source::SourceType;
    use common::storage::types::sync_run::SyncRunStatus;
    use common::utils::config::ContentBackend;
    use std::time::Duration;
    use uuid::Uuid;

    fn draft(external_id: &str, content_id: &str) -> NewDocument {
        NewDocument {
            external_id: external_id.to_string(),
            title: external_id.to_string(),
            mime_type: "text/plain".to_string(),
            url: None,
            metadata: DocumentMetadata::default(),
            permissions: DocumentPermissions::default(),
            attributes: serde_json::Value::Null,
            content_id: content_id.to_string(),
        }
    }

    /// Emits a fixed roster of objects; understands full and incremental mode
    /// through `last_sync_at`, checks cancellation at every object, and
    /// records per-object failures without failing the run.
    struct ScriptedConnector {
        /// (external_id, object timestamp, fails_transformation)
        objects: Vec<(String, chrono::DateTime<chrono::Utc>, bool)>,
        per_object_delay: Duration,
        auth_failure: bool,
    }

    impl ScriptedConnector {
        fn with_objects(count: usize) -> Self {
            let now = chrono::Utc::now();
            Self {
                objects: (0..count)
                    .map(|i| (format!("scripted:item:{i}"), now, false))
                    .collect(),
                per_object_delay: Duration::ZERO,
                auth_failure: false,
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn sync_modes(&self) -> &[SyncType] {
            &[SyncType::Full, SyncType::Incremental]
        }

        async fn sync(
            &self,
            _source_config: serde_json::Value,
            credentials: serde_json::Value,
            state: Option<serde_json::Value>,
            ctx: SyncContext,
        ) -> Result<(), AppError> {
            if self.auth_failure || credentials.get("token").is_none() {
                ctx.fail("Authentication failed: invalid token").await?;
                return Ok(());
            }

            let watermark = state
                .as_ref()
                .and_then(|s| s.get("last_sync_at"))
                .and_then(|v| v.as_str())
                .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&chrono::Utc));

            let mut emitted = 0usize;
            for (external_id, modified_at, fails) in &self.objects {
                if ctx.is_cancelled() {
                    ctx.fail("Cancelled").await?;
                    return Ok(());
                }

                // Objects come most-recent-first; stop at the watermark.
                if let Some(watermark) = watermark {
                    if *modified_at < watermark {
                        break;
                    }
                }

                ctx.increment_scanned().await?;

                if *fails {
                    ctx.emit_error(external_id, "unmappable object");
                    continue;
                }

                let content_id = ctx
                    .content_storage()
                    .save(format!("content of {external_id}"), "text/plain")
                    .await?;
                ctx.emit(draft(external_id, &content_id)).await?;

                emitted += 1;
                if emitted % CHECKPOINT_INTERVAL == 0 {
                    ctx.save_state(serde_json::json!({
                        "last_sync_at": ctx.started_at().to_rfc3339(),
                    }))
                    .await?;
                }

                if !self.per_object_delay.is_zero() {
                    tokio::time::sleep(self.per_object_delay).await;
                }
            }

            ctx.complete(serde_json::json!({
                "last_sync_at": ctx.started_at().to_rfc3339(),
            }))
            .await
        }
    }

    /// A connector whose `sync` returns an error instead of finalizing.
    struct PanickyConnector;

    #[async_trait]
    impl Connector for PanickyConnector {
        fn name(&self) -> &str {
            "panicky"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn sync_modes(&self) -> &[SyncType] {
            &[SyncType::Full]
        }

        async fn sync(
            &self,
            _source_config: serde_json::Value,
            _credentials: serde_json::Value,
            _state: Option<serde_json::Value>,
            _ctx: SyncContext,
        ) -> Result<(), AppError> {
            Err(AppError::Processing("upstream exploded mid-page".into()))
        }
    }

    async fn coordinator_with(
        connector: Arc<dyn Connector>,
        credentials: serde_json::Value,
    ) -> (Arc<SyncCoordinator>, Arc<SurrealDbClient>, Source) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("coordinator_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");

        let source = Source::new(
            "Scripted source".into(),
            SourceType::Hubspot,
            serde_json::json!({}),
            credentials,
        );
        db.store_item(source.clone()).await.expect("store source");

        let mut registry = ConnectorRegistry::new();
        registry.register(SourceType::Hubspot, connector);

        let content = ContentStore::new(db.clone(), StorageManager::memory(), ContentBackend::Database);
        let coordinator = Arc::new(SyncCoordinator::new(db.clone(), content, registry));

        (coordinator, db, source)
    }

    async fn wait_for_terminal(db: &SurrealDbClient, sync_run_id: &str) -> SyncRun {
        for _ in 0..200 {
            let run: SyncRun = db
                .get_item(sync_run_id)
                .await
                .expect("fetch run")
                .expect("run exists");
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync run {sync_run_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn full_sync_completes_and_counts() {
        let connector = Arc::new(ScriptedConnector::with_objects(4));
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");
        let run = wait_for_terminal(&db, &run_id).await;

        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.documents_scanned, 4);
        assert_eq!(run.documents_emitted, 4);

        // The watermark was persisted for the next incremental run.
        let fetched: Source = db.get_item(&source.id).await.expect("fetch").expect("source");
        assert!(fetched
            .connector_state
            .and_then(|s| s.get("last_sync_at").cloned())
            .is_some());
    }

    #[tokio::test]
    async fn per_object_failures_do_not_fail_the_run() {
        let now = chrono::Utc::now();
        let connector = Arc::new(ScriptedConnector {
            objects: vec![
                ("scripted:item:0".into(), now, false),
                ("scripted:item:1".into(), now, true),
                ("scripted:item:2".into(), now, false),
            ],
            per_object_delay: Duration::ZERO,
            auth_failure: false,
        });
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");
        let run = wait_for_terminal(&db, &run_id).await;

        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.documents_scanned, 3);
        assert_eq!(run.documents_emitted, 2);
    }

    #[tokio::test]
    async fn authentication_failure_fails_the_run() {
        let connector = Arc::new(ScriptedConnector::with_objects(3));
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");
        let run = wait_for_terminal(&db, &run_id).await;

        assert_eq!(run.status, SyncRunStatus::Failed);
        assert!(run
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("Authentication")));
        assert_eq!(run.documents_emitted, 0);
    }

    #[tokio::test]
    async fn incremental_sync_stops_at_the_watermark() {
        let old = chrono::Utc::now() - chrono::Duration::days(30);
        let connector = Arc::new(ScriptedConnector {
            objects: (0..3)
                .map(|i| (format!("scripted:item:{i}"), old, false))
                .collect(),
            per_object_delay: Duration::ZERO,
            auth_failure: false,
        });
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        // First, a full sync over the 3 (old) objects.
        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start full");
        let run = wait_for_terminal(&db, &run_id).await;
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.documents_emitted, 3);

        // Nothing changed upstream: the incremental run emits nothing and
        // still completes.
        let run_id = coordinator
            .start_sync(&source.id, SyncType::Incremental)
            .await
            .expect("start incremental");
        let run = wait_for_terminal(&db, &run_id).await;
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.documents_emitted, 0);
    }

    #[tokio::test]
    async fn concurrent_syncs_for_one_source_are_rejected() {
        let connector = Arc::new(ScriptedConnector {
            objects: (0..50)
                .map(|i| (format!("scripted:item:{i}"), chrono::Utc::now(), false))
                .collect(),
            per_object_delay: Duration::from_millis(20),
            auth_failure: false,
        });
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");

        let second = coordinator.start_sync(&source.id, SyncType::Full).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        // Let it finish so the task does not outlive the test db.
        coordinator.cancel(&run_id).await;
        wait_for_terminal(&db, &run_id).await;
    }

    #[tokio::test]
    async fn cancellation_is_cooperative_and_stops_emission() {
        let connector = Arc::new(ScriptedConnector {
            objects: (0..100)
                .map(|i| (format!("scripted:item:{i}"), chrono::Utc::now(), false))
                .collect(),
            per_object_delay: Duration::from_millis(10),
            auth_failure: false,
        });
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");

        // Wait until some documents have been emitted, then cancel.
        for _ in 0..200 {
            let run: SyncRun = db.get_item(&run_id).await.expect("fetch").expect("run");
            if run.documents_emitted >= 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(coordinator.cancel(&run_id).await, "run should be cancellable");

        let run = wait_for_terminal(&db, &run_id).await;
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("Cancelled"));
        assert!(
            run.documents_emitted < 100,
            "cancellation must stop further emission"
        );

        // Cancelling a finished run is a no-op once its task unregisters.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!coordinator.cancel(&run_id).await);
    }

    #[tokio::test]
    async fn connector_errors_become_failed_runs() {
        let (coordinator, db, source) =
            coordinator_with(Arc::new(PanickyConnector), serde_json::json!({})).await;

        let run_id = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("start");
        let run = wait_for_terminal(&db, &run_id).await;

        assert_eq!(run.status, SyncRunStatus::Failed);
        assert!(run
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("upstream exploded")));
    }

    #[tokio::test]
    async fn unsupported_mode_and_unknown_source_are_validation_errors() {
        let (coordinator, _db, source) =
            coordinator_with(Arc::new(PanickyConnector), serde_json::json!({})).await;

        let unknown = coordinator.start_sync("missing-source", SyncType::Full).await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));

        let unsupported = coordinator
            .start_sync(&source.id, SyncType::Incremental)
            .await;
        assert!(matches!(unsupported, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn a_source_can_sync_again_after_completion() {
        let connector = Arc::new(ScriptedConnector::with_objects(2));
        let (coordinator, db, source) =
            coordinator_with(connector, serde_json::json!({"token": "ok"})).await;

        let first = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("first");
        wait_for_terminal(&db, &first).await;

        let second = coordinator
            .start_sync(&source.id, SyncType::Full)
            .await
            .expect("second run starts after the first finished");
        let run = wait_for_terminal(&db, &second).await;
        assert_eq!(run.status, SyncRunStatus::Completed);
    }
}
