
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        content::ContentStore,
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            batch_job::{BatchJob, BatchJobStatus},
            document::{Document, EmbeddingStatus},
            embedding::Embedding,
            embedding_queue_item::EmbeddingQueueItem,
        },
    },
    utils::{config::AppConfig, settings_cache::SettingsCache},
};
use bytes::Bytes;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    chunking::{slice_chars, Chunker},
    providers::{BatchInputRecord, BatchOutputRecord, EmbeddingJobProvider, ModelInput},
    record_id::{format_record_id, parse_record_id},
};

/// Knobs for the accumulation and monitoring loops.
#[derive(Debug, Clone)]
pub struct BatchTuning {
    pub min_documents: usize,
    pub max_documents: usize,
    pub accumulation_timeout: Duration,
    pub accumulation_poll_interval: Duration,
    pub monitor_poll_interval: Duration,
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            min_documents: 10,
            max_documents: 100,
            accumulation_timeout: Duration::from_secs(300),
            accumulation_poll_interval: Duration::from_secs(10),
            monitor_poll_interval: Duration::from_secs(30),
        }
    }
}

impl BatchTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_documents: config.embedding_batch_min_documents,
            max_documents: config.embedding_batch_max_documents,
            accumulation_timeout: Duration::from_secs(
                config.embedding_batch_accumulation_timeout_seconds,
            ),
            accumulation_poll_interval: Duration::from_secs(
                config.embedding_batch_accumulation_poll_interval,
            ),
            monitor_poll_interval: Duration::from_secs(
                config.embedding_batch_monitor_poll_interval,
            ),
        }
    }
}

struct AccumulationTracker {
    last_seen_count: usize,
    last_change_at: Instant,
}

/// Drives queued documents through batch embedding: accumulate cost-efficient
/// batches, prepare and submit manifests, watch remote jobs, and ingest the
/// returned vectors.
pub struct BatchOrchestrator {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    content: ContentStore,
    provider: Arc<dyn EmbeddingJobProvider>,
    settings: Arc<SettingsCache>,
    tuning: BatchTuning,
    tracker: Mutex<AccumulationTracker>,
}

impl BatchOrchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        content: ContentStore,
        provider: Arc<dyn EmbeddingJobProvider>,
        settings: Arc<SettingsCache>,
        tuning: BatchTuning,
    ) -> Self {
        Self {
            db,
            storage,
            content,
            provider,
            settings,
            tuning,
            tracker: Mutex::new(AccumulationTracker {
                last_seen_count: 0,
                last_change_at: Instant::now(),
            }),
        }
    }

    pub fn tuning(&self) -> &BatchTuning {
        &self.tuning
    }

    /// One pass of the accumulation loop: look at the unassigned pending rows
    /// and decide whether they make a batch. Returns the created job, if any;
    /// the caller hands it to [`prepare_and_submit`](Self::prepare_and_submit)
    /// as an independent task.
    #[tracing::instrument(skip(self))]
    pub async fn accumulation_tick(&self) -> Result<Option<BatchJob>, AppError> {
        let items = EmbeddingQueueItem::claim_pending(self.tuning.max_documents, &self.db).await?;
        if items.is_empty() {
            return Ok(None);
        }

        let stable_for = {
            #[allow(clippy::expect_used)]
            let mut tracker = self.tracker.lock().expect("accumulation tracker poisoned");
            if tracker.last_seen_count != items.len() {
                tracker.last_seen_count = items.len();
                tracker.last_change_at = Instant::now();
            }
            tracker.last_change_at.elapsed()
        };

        let enough = items.len() >= self.tuning.min_documents;
        let full = items.len() >= self.tuning.max_documents;
        let stale = stable_for >= self.tuning.accumulation_timeout;

        if !enough || !(full || stale) {
            return Ok(None);
        }

        let job = BatchJob::create(self.provider.provider_id(), items.len() as u64, &self.db)
            .await?;
        let item_ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        EmbeddingQueueItem::assign_to_batch(&job.id, &item_ids, &self.db).await?;

        {
            #[allow(clippy::expect_used)]
            let mut tracker = self.tracker.lock().expect("accumulation tracker poisoned");
            tracker.last_seen_count = 0;
            tracker.last_change_at = Instant::now();
        }

        info!(
            batch_id = %job.id,
            documents = items.len(),
            "created embedding batch"
        );

        Ok(Some(job))
    }

    /// Chunk every document of the batch, upload the JSONL manifest, submit
    /// the job and move its rows to `processing`. Any failure marks the batch
    /// and its items failed.
    #[tracing::instrument(skip(self))]
    pub async fn prepare_and_submit(&self, batch_id: &str) {
        if let Err(err) = self.prepare_and_submit_inner(batch_id).await {
            error!(%batch_id, error = %err, "batch preparation failed");
            if let Err(mark_err) = self.fail_batch(batch_id, &err.to_string()).await {
                error!(%batch_id, error = %mark_err, "failed to mark batch as failed");
            }
        }
    }

    async fn prepare_and_submit_inner(&self, batch_id: &str) -> Result<(), AppError> {
        BatchJob::mark_preparing(batch_id, &self.db).await?;

        // Chunk parameters come through the TTL-cached settings row; a stale
        // read within the TTL is fine.
        let settings = self.settings.get(&self.db).await?;
        let chunker = Chunker::new(
            settings.chunking_strategy.clone(),
            settings.chunk_max_chars as usize,
        );

        let items = EmbeddingQueueItem::for_batch(batch_id, &self.db).await?;
        let mut records: Vec<BatchInputRecord> = Vec::new();

        for item in &items {
            let document: Document = match self.db.get_item(&item.document_id).await? {
                Some(document) => document,
                None => {
                    warn!(
                        document_id = %item.document_id,
                        "skipping queue item: document no longer exists"
                    );
                    continue;
                }
            };

            let text = match self.content.load(&document.content_id).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "skipping queue item: content unavailable"
                    );
                    continue;
                }
            };

            if text.is_empty() {
                warn!(document_id = %document.id, "skipping queue item: empty content");
                continue;
            }

            let spans = chunker.chunk(&text).await?;
            for (chunk_index, &(start, end)) in spans.iter().enumerate() {
                let chunk_text = slice_chars(&text, start, end).ok_or_else(|| {
                    AppError::InternalError(format!(
                        "chunk span ({start}, {end}) escaped document {}",
                        document.id
                    ))
                })?;

                records.push(BatchInputRecord {
                    record_id: format_record_id(
                        &document.id,
                        chunk_index as u32,
                        start as u64,
                        end as u64,
                    ),
                    model_input: ModelInput {
                        input_text: chunk_text.to_owned(),
                    },
                });
            }
        }

        if records.is_empty() {
            return Err(AppError::Processing(
                "no chunkable content in batch".to_owned(),
            ));
        }

        let input_path = format!("batch/input/{batch_id}.jsonl");
        let output_path = format!("batch/output/{batch_id}");

        let mut manifest = String::new();
        for record in &records {
            manifest.push_str(&serde_json::to_string(record)?);
            manifest.push('\n');
        }
        self.storage
            .put(&input_path, Bytes::from(manifest.into_bytes()))
            .await?;

        let external_job_id = self
            .provider
            .submit_job(&input_path, &output_path, batch_id)
            .await?;

        BatchJob::mark_submitted(batch_id, &external_job_id, &input_path, &output_path, &self.db)
            .await?;
        EmbeddingQueueItem::mark_processing(batch_id, &self.db).await?;

        let document_ids: Vec<String> = items.iter().map(|i| i.document_id.clone()).collect();
        Document::set_embedding_status_many(&document_ids, EmbeddingStatus::Processing, &self.db)
            .await?;

        info!(
            %batch_id,
            %external_job_id,
            chunks = records.len(),
            "submitted embedding batch"
        );

        Ok(())
    }

    /// One pass of the monitoring loop: poll every watchable job and act on
    /// terminal transitions. Per-job failures are logged and do not stop the
    /// sweep.
    #[tracing::instrument(skip(self))]
    pub async fn monitor_tick(&self) -> Result<(), AppError> {
        let jobs = BatchJob::get_active(&self.db).await?;

        for job in jobs {
            if let Err(err) = self.monitor_job(&job).await {
                error!(batch_id = %job.id, error = %err, "failed to monitor batch job");
            }
        }

        Ok(())
    }

    async fn monitor_job(&self, job: &BatchJob) -> Result<(), AppError> {
        let external_job_id = job.external_job_id.as_deref().ok_or_else(|| {
            AppError::InternalError(format!("active batch {} has no external job id", job.id))
        })?;

        let state = self.provider.get_job_status(external_job_id).await?;

        match state.status {
            BatchJobStatus::Completed => {
                self.ingest_results(job).await?;
            }
            BatchJobStatus::Failed => {
                let message = state
                    .error_message
                    .unwrap_or_else(|| "batch job failed".to_owned());
                self.fail_batch(&job.id, &message).await?;
            }
            BatchJobStatus::Processing if job.status == BatchJobStatus::Submitted => {
                BatchJob::mark_processing(&job.id, &self.db).await?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Download the job's output files, reconstruct chunk identities, and
    /// atomically replace each affected document's embedding set.
    async fn ingest_results(&self, job: &BatchJob) -> Result<(), AppError> {
        let output_path = job.output_storage_path.as_deref().ok_or_else(|| {
            AppError::InternalError(format!("batch {} has no output path", job.id))
        })?;

        let model_name = self.provider.model_name();
        let mut grouped: HashMap<String, Vec<Embedding>> = HashMap::new();

        for meta in self.storage.list(Some(output_path)).await? {
            let location = meta.location.to_string();
            if !location.ends_with(".jsonl") && !location.ends_with(".out") {
                continue;
            }

            let raw = self.storage.get(&location).await?;
            for line in String::from_utf8_lossy(&raw).lines() {
                if line.trim().is_empty() {
                    continue;
                }

                let record: BatchOutputRecord = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(batch_id = %job.id, error = %err, "skipping unparseable output line");
                        continue;
                    }
                };

                if let Some(message) = record.error {
                    warn!(
                        batch_id = %job.id,
                        record_id = %record.record_id,
                        error = %message,
                        "provider reported a per-record error"
                    );
                    continue;
                }

                let Some(identity) = parse_record_id(&record.record_id) else {
                    warn!(
                        batch_id = %job.id,
                        record_id = %record.record_id,
                        "skipping output line with malformed record id"
                    );
                    continue;
                };

                let Some(output) = record.model_output else {
                    warn!(
                        batch_id = %job.id,
                        record_id = %record.record_id,
                        "skipping output line without a vector"
                    );
                    continue;
                };

                grouped.entry(identity.document_id.clone()).or_default().push(
                    Embedding::new(
                        identity.document_id,
                        identity.chunk_index,
                        identity.start,
                        identity.end,
                        output.embedding,
                        model_name.to_owned(),
                    ),
                );
            }
        }

        let mut embedded_ids: Vec<String> = grouped.keys().cloned().collect();
        embedded_ids.sort();

        let mut rows: Vec<Embedding> = Vec::new();
        for chunks in grouped.into_values() {
            let mut chunks = chunks;
            chunks.sort_by_key(|e| e.chunk_index);
            rows.extend(chunks);
        }

        Embedding::replace_for_documents(&embedded_ids, rows, &self.db).await?;
        Document::set_embedding_status_many(&embedded_ids, EmbeddingStatus::Completed, &self.db)
            .await?;

        // Settle the queue: rows whose document came back are done, anything
        // the provider never answered for is failed.
        let items = EmbeddingQueueItem::for_batch(&job.id, &self.db).await?;
        let mut completed_ids = Vec::new();
        let mut unanswered_ids = Vec::new();
        let mut unanswered_documents = Vec::new();
        for item in items {
            if item.status.is_terminal() {
                continue;
            }
            if embedded_ids.binary_search(&item.document_id).is_ok() {
                completed_ids.push(item.id);
            } else {
                unanswered_ids.push(item.id);
                unanswered_documents.push(item.document_id);
            }
        }

        EmbeddingQueueItem::mark_completed(&completed_ids, &self.db).await?;
        if !unanswered_ids.is_empty() {
            warn!(
                batch_id = %job.id,
                documents = unanswered_ids.len(),
                "batch output covered no chunks for some documents"
            );
            EmbeddingQueueItem::mark_failed(
                &unanswered_ids,
                "no embedding output returned for document",
                &self.db,
            )
            .await?;
            Document::set_embedding_status_many(
                &unanswered_documents,
                EmbeddingStatus::Failed,
                &self.db,
            )
            .await?;
        }

        BatchJob::mark_completed(&job.id, &self.db).await?;

        info!(
            batch_id = %job.id,
            documents = embedded_ids.len(),
            "ingested embedding batch results"
        );

        Ok(())
    }

    /// Terminalize a batch and everything attached to it.
    async fn fail_batch(&self, batch_id: &str, message: &str) -> Result<(), AppError> {
        BatchJob::mark_failed(batch_id, message, &self.db).await?;

        let items = EmbeddingQueueItem::for_batch(batch_id, &self.db).await?;
        let item_ids: Vec<String> = items
            .iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| item.id.clone())
            .collect();
        let document_ids: Vec<String> = items
            .iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| item.document_id.clone())
            .collect();

        EmbeddingQueueItem::mark_failed(&item_ids, message, &self.db).await?;
        Document::set_embedding_status_many(&document_ids, EmbeddingStatus::Failed, &self.db)
            .await?;

        Ok(())
    }
}

/// Accumulation loop: never crashes; errors are logged and the loop sleeps on.
pub async fn run_accumulation_loop(orchestrator: Arc<BatchOrchestrator>) {
    let interval = orchestrator.tuning().accumulation_poll_interval;
    info!(poll_interval_secs = interval.as_secs(), "starting batch accumulation loop");

    loop {
        match orchestrator.accumulation_tick().await {
            Ok(Some(job)) => {
                // Hand off so a slow upload never blocks accumulation.
                let worker = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    worker.prepare_and_submit(&job.id).await;
                });
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "accumulation tick failed");
            }
        }

        sleep(interval).await;
    }
}

/// Monitoring loop: polls active jobs until terminal; idempotent across
/// restarts, so an in-flight batch left behind by a previous process is picked
/// up on the next start.
pub async fn run_monitor_loop(orchestrator: Arc<BatchOrchestrator>) {
    let interval = orchestrator.tuning().monitor_poll_interval;
    info!(poll_interval_secs = interval.as_secs(), "starting batch monitor loop");

    loop {
        if let Err(err) = orchestrator.monitor_tick().await {
            error!(error = %err, "monitor tick failed");
        }

        sleep(interval).await;
    }
}
