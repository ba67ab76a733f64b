use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    stored_object,
    utils::config::{AppConfig, ChunkingStrategyKind},
};

stored_object!(SystemSettings, "system_settings", {
    embedding_model: String,
    embedding_dimensions: u32,
    chunking_strategy: ChunkingStrategyKind,
    chunk_max_chars: u64
});

impl SystemSettings {
    /// The single settings row every reader consults.
    pub const CURRENT_ID: &'static str = "current";

    pub fn from_config(config: &AppConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Self::CURRENT_ID.to_string(),
            created_at: now,
            updated_at: now,
            embedding_model: config.embedding_model.clone(),
            embedding_dimensions: config.embedding_dimensions,
            chunking_strategy: config.chunking_strategy.clone(),
            chunk_max_chars: config.chunk_max_chars as u64,
        }
    }

    pub async fn get_current(db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item(Self::CURRENT_ID)
            .await?
            .ok_or_else(|| AppError::NotFound("system settings".to_owned()))
    }

    /// Write the configured values onto the settings row at startup.
    pub async fn sync_from_config(
        db: &SurrealDbClient,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        let settings = Self::from_config(config);
        let _stored: Option<Self> = db
            .client
            .upsert((Self::table_name(), Self::CURRENT_ID))
            .content(settings.clone())
            .await?;

        Ok(settings)
    }
}
