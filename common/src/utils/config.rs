use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
    S3,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentBackend {
    Database,
    ObjectStore,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Openai,
    RemoteBatch,
}

#[derive(Clone, serde::Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategyKind {
    Fixed,
    Sentence,
    Semantic,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub object_store_bucket: Option<String>,
    #[serde(default)]
    pub object_store_region: Option<String>,
    #[serde(default = "default_content_backend")]
    pub content_backend: ContentBackend,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub batch_api_url: Option<String>,
    #[serde(default)]
    pub batch_api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enable_embedding_batch_inference: bool,
    #[serde(default = "default_batch_min_documents")]
    pub embedding_batch_min_documents: usize,
    #[serde(default = "default_batch_max_documents")]
    pub embedding_batch_max_documents: usize,
    #[serde(default = "default_batch_accumulation_timeout")]
    pub embedding_batch_accumulation_timeout_seconds: u64,
    #[serde(default = "default_batch_accumulation_poll")]
    pub embedding_batch_accumulation_poll_interval: u64,
    #[serde(default = "default_batch_monitor_poll")]
    pub embedding_batch_monitor_poll_interval: u64,
    #[serde(default = "default_chunking_strategy")]
    pub chunking_strategy: ChunkingStrategyKind,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_content_backend() -> ContentBackend {
    ContentBackend::Database
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Openai
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_true() -> bool {
    true
}

fn default_batch_min_documents() -> usize {
    10
}

fn default_batch_max_documents() -> usize {
    100
}

fn default_batch_accumulation_timeout() -> u64 {
    300
}

fn default_batch_accumulation_poll() -> u64 {
    10
}

fn default_batch_monitor_poll() -> u64 {
    30
}

fn default_chunking_strategy() -> ChunkingStrategyKind {
    ChunkingStrategyKind::Sentence
}

fn default_chunk_max_chars() -> usize {
    1800
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// A config suitable for tests: in-memory everything, no credentials.
    pub fn for_tests() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            http_port: 0,
            data_dir: "/tmp/unused".into(),
            storage: StorageKind::Memory,
            object_store_bucket: None,
            object_store_region: None,
            content_backend: ContentBackend::Database,
            openai_api_key: "test-key".into(),
            openai_base_url: "https://example.com/v1".into(),
            embedding_provider: EmbeddingProviderKind::Openai,
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 1536,
            batch_api_url: None,
            batch_api_key: None,
            enable_embedding_batch_inference: true,
            embedding_batch_min_documents: 3,
            embedding_batch_max_documents: 5,
            embedding_batch_accumulation_timeout_seconds: 10,
            embedding_batch_accumulation_poll_interval: 1,
            embedding_batch_monitor_poll_interval: 1,
            chunking_strategy: ChunkingStrategyKind::Sentence,
            chunk_max_chars: 1800,
        }
    }
}
