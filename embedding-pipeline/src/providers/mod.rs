pub mod openai;
pub mod remote;

use async_trait::async_trait;
use common::{error::AppError, storage::types::batch_job::BatchJobStatus};
use serde::{Deserialize, Serialize};

pub use openai::OpenAiBatchBridge;
pub use remote::RemoteBatchProvider;

/// Terminal-aware view of a remote job, as reported by a provider.
#[derive(Debug, Clone)]
pub struct ProviderJobState {
    pub status: BatchJobStatus,
    pub error_message: Option<String>,
}

/// The narrow surface the orchestrator consumes. One instance serves the whole
/// process; adapters wrap the actual inference backend.
#[async_trait]
pub trait EmbeddingJobProvider: Send + Sync {
    /// Stable identifier recorded on the `BatchJob` row.
    fn provider_id(&self) -> &str;

    /// Model identifier echoed into every `Embedding` row.
    fn model_name(&self) -> &str;

    /// Submit a prepared manifest; returns the provider's job handle.
    async fn submit_job(
        &self,
        input_path: &str,
        output_path: &str,
        job_name: &str,
    ) -> Result<String, AppError>;

    async fn get_job_status(&self, external_job_id: &str) -> Result<ProviderJobState, AppError>;
}

/// One line of a batch input manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInputRecord {
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modelInput")]
    pub model_input: ModelInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInput {
    #[serde(rename = "inputText")]
    pub input_text: String,
}

/// One line of a batch output file: either a vector or a per-record error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchOutputRecord {
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modelOutput", default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<ModelOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelOutput {
    pub embedding: Vec<f32>,
}

/// Map a provider-reported state string onto the internal status enum.
pub fn map_provider_state(state: &str) -> Option<BatchJobStatus> {
    match state.to_ascii_lowercase().as_str() {
        "submitted" | "queued" => Some(BatchJobStatus::Submitted),
        "inprogress" | "in_progress" | "stopping" => Some(BatchJobStatus::Processing),
        "completed" | "succeeded" => Some(BatchJobStatus::Completed),
        "failed" | "stopped" => Some(BatchJobStatus::Failed),
        _ => None,
    }
}

/// Parse a JSONL manifest into input records, preserving line order.
pub fn parse_input_manifest(raw: &str) -> Result<Vec<BatchInputRecord>, AppError> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AppError::Serde))
        .collect()
}

/// Render output records as JSONL.
pub fn render_output_lines(records: &[BatchOutputRecord]) -> Result<String, AppError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }

    Ok(out)
}
