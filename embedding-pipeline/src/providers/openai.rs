use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{store::StorageManager, types::batch_job::BatchJobStatus},
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    parse_input_manifest, render_output_lines, BatchOutputRecord, EmbeddingJobProvider,
    ModelOutput, ProviderJobState,
};

/// The OpenAI embeddings endpoint accepts at most this many inputs per call.
const MAX_BATCH_SIZE: usize = 2048;
const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_RETRIES: usize = 3;

/// Degenerate batch path over an OpenAI-compatible synchronous embeddings API:
/// `submit_job` embeds the whole manifest in-line, writes the output JSONL
/// itself, and reports the job as already completed.
pub struct OpenAiBatchBridge {
    client: Arc<Client<OpenAIConfig>>,
    storage: StorageManager,
    model: String,
    dimensions: u32,
}

impl OpenAiBatchBridge {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        storage: StorageManager,
        model: String,
        dimensions: u32,
    ) -> Self {
        Self {
            client,
            storage,
            model,
            dimensions,
        }
    }

    /// Embed a list of texts, splitting into endpoint-sized batches. Transient
    /// failures (429s and friends) are retried with exponential backoff before
    /// failing the enclosing operation.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
                .map(jitter)
                .take(MAX_RETRIES);

            let response = Retry::spawn(retry_strategy, || async {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(&self.model)
                    .dimensions(self.dimensions)
                    .input(batch.to_vec())
                    .build()?;

                self.client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(AppError::OpenAI)
            })
            .await?;

            // The API may return data out of order; restore request order.
            let mut data = response.data;
            data.sort_by_key(|d| d.index);
            debug!(batch_size = batch.len(), "embedded batch of chunk texts");

            all_embeddings.extend(data.into_iter().map(|d| d.embedding));
        }

        Ok(all_embeddings)
    }
}

#[async_trait]
impl EmbeddingJobProvider for OpenAiBatchBridge {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn submit_job(
        &self,
        input_path: &str,
        output_path: &str,
        job_name: &str,
    ) -> Result<String, AppError> {
        let raw = self.storage.get(input_path).await?;
        let manifest = parse_input_manifest(&String::from_utf8_lossy(&raw))?;

        let texts: Vec<String> = manifest
            .iter()
            .map(|record| record.model_input.input_text.clone())
            .collect();
        let embeddings = self.embed_texts(&texts).await?;

        if embeddings.len() != manifest.len() {
            return Err(AppError::Provider(format!(
                "embedding count mismatch: {} inputs, {} vectors",
                manifest.len(),
                embeddings.len()
            )));
        }

        let records: Vec<BatchOutputRecord> = manifest
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| BatchOutputRecord {
                record_id: record.record_id,
                model_output: Some(ModelOutput { embedding }),
                error: None,
            })
            .collect();

        let output_location = format!(
            "{}/{job_name}.jsonl.out",
            output_path.trim_end_matches('/')
        );
        let body = render_output_lines(&records)?;
        self.storage
            .put(&output_location, Bytes::from(body.into_bytes()))
            .await?;

        info!(
            records = records.len(),
            %output_location,
            "synchronous embedding bridge wrote batch output"
        );

        Ok(format!("openai-sync-{}", Uuid::new_v4()))
    }

    async fn get_job_status(&self, _external_job_id: &str) -> Result<ProviderJobState, AppError> {
        // The work already happened during submission.
        Ok(ProviderJobState {
            status: BatchJobStatus::Completed,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_with_memory_storage() -> (OpenAiBatchBridge, StorageManager) {
        let storage = StorageManager::memory();
        let client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("https://example.invalid/v1"),
        ));
        let bridge = OpenAiBatchBridge::new(
            client,
            storage.clone(),
            "text-embedding-3-small".into(),
            1536,
        );
        (bridge, storage)
    }

    #[tokio::test]
    async fn empty_input_embeds_to_nothing_without_network() {
        let (bridge, _storage) = bridge_with_memory_storage();
        let embeddings = bridge.embed_texts(&[]).await.expect("embed nothing");
        assert!(embeddings.is_empty());
    }

    #[test]
    fn reports_completed_without_polling() {
        let (bridge, _storage) = bridge_with_memory_storage();
        let state = futures::executor::block_on(bridge.get_job_status("openai-sync-x"))
            .expect("status");
        assert_eq!(state.status, BatchJobStatus::Completed);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn identifies_itself_for_forensics() {
        let (bridge, _storage) = bridge_with_memory_storage();
        assert_eq!(bridge.provider_id(), "openai");
        assert_eq!(bridge.model_name(), "text-embedding-3-small");
    }
}
