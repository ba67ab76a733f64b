use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        content::ContentStore,
        db::SurrealDbClient,
        types::{
            document::{Document, EmbeddingStatus, NewDocument},
            embedding_queue_item::EmbeddingQueueItem,
            source::{Source, SourceType},
            sync_run::SyncRun,
        },
    },
};
use tracing::{debug, info, warn};

/// How many emitted documents a connector should go between checkpoints; this
/// bounds lost work on a crash.
pub const CHECKPOINT_INTERVAL: usize = 50;

struct ContextInner {
    db: Arc<SurrealDbClient>,
    content: ContentStore,
    sync_run_id: String,
    source_id: String,
    source_type: SourceType,
    started_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    finalized: AtomicBool,
}

/// The capability surface a connector drives a sync through: emit documents,
/// store content, checkpoint state, observe cancellation, and finalize.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<ContextInner>,
}

impl SyncContext {
    pub fn new(
        db: Arc<SurrealDbClient>,
        content: ContentStore,
        sync_run_id: String,
        source_id: String,
        source_type: SourceType,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                db,
                content,
                sync_run_id,
                source_id,
                source_type,
                started_at: Utc::now(),
                cancelled,
                finalized: AtomicBool::new(false),
            }),
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.inner.source_type
    }

    pub fn sync_run_id(&self) -> &str {
        &self.inner.sync_run_id
    }

    /// The instant this sync started. Incremental connectors checkpoint this
    /// (not the completion time) as `last_sync_at`, so modifications racing
    /// the sync are picked up next time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// The content store for raw document text.
    pub fn content_storage(&self) -> &ContentStore {
        &self.inner.content
    }

    /// Upsert a document by `external_id` and enqueue it for embedding unless
    /// it is already embedded and its content is unchanged.
    pub async fn emit(&self, draft: NewDocument) -> Result<(), AppError> {
        let outcome =
            Document::upsert_by_external_id(&self.inner.source_id, draft, &self.inner.db).await?;

        let needs_embedding = outcome.content_changed
            || outcome
                .previous_status
                .is_none_or(|status| status != EmbeddingStatus::Completed);

        if needs_embedding {
            EmbeddingQueueItem::enqueue(&outcome.document.id, &self.inner.db).await?;
            Document::set_embedding_status(
                &outcome.document.id,
                EmbeddingStatus::Pending,
                &self.inner.db,
            )
            .await?;
        }

        SyncRun::increment_emitted(&self.inner.sync_run_id, &self.inner.db).await?;
        debug!(
            external_id = %outcome.document.external_id,
            enqueued = needs_embedding,
            "document emitted"
        );

        Ok(())
    }

    pub async fn increment_scanned(&self) -> Result<(), AppError> {
        SyncRun::increment_scanned(&self.inner.sync_run_id, &self.inner.db).await
    }

    /// Record a per-object failure. The sync keeps going; these are surfaced
    /// as structured events rather than failing the run.
    pub fn emit_error(&self, external_id: &str, message: &str) {
        warn!(
            sync_run_id = %self.inner.sync_run_id,
            source_id = %self.inner.source_id,
            external_id,
            message,
            "per-object sync error"
        );
    }

    /// Durable mid-sync checkpoint. A failed sync resumes from the last state
    /// written here.
    pub async fn save_state(&self, state: serde_json::Value) -> Result<(), AppError> {
        Source::save_state(&self.inner.source_id, state, &self.inner.db).await
    }

    /// Terminal success: persist the final state and close the run.
    pub async fn complete(&self, new_state: serde_json::Value) -> Result<(), AppError> {
        self.inner.finalized.store(true, Ordering::SeqCst);
        Source::save_state(&self.inner.source_id, new_state, &self.inner.db).await?;
        SyncRun::mark_completed(&self.inner.sync_run_id, &self.inner.db).await?;
        info!(sync_run_id = %self.inner.sync_run_id, "sync completed");

        Ok(())
    }

    /// Terminal failure: the connector state is left as last checkpointed.
    pub async fn fail(&self, reason: &str) -> Result<(), AppError> {
        self.inner.finalized.store(true, Ordering::SeqCst);
        SyncRun::mark_failed(&self.inner.sync_run_id, reason, &self.inner.db).await?;
        info!(sync_run_id = %self.inner.sync_run_id, reason, "sync failed");

        Ok(())
    }

    /// Cooperative cancellation: connectors poll this at page and object
    /// boundaries and finalize with `fail("Cancelled")` when it turns true.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the connector already finalized the run.
    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::SeqCst)
    }
}
