use std::sync::Arc;

use bytes::Bytes;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::content_blob::{ContentBlob, StorageBackend},
    },
    utils::config::ContentBackend,
};

/// Dual-backend store for raw document text. Writes go to the configured
/// backend; reads dispatch on the backend recorded per blob, so a deployment
/// can switch backends without migrating old rows.
#[derive(Clone)]
pub struct ContentStore {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    backend: ContentBackend,
}

impl ContentStore {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager, backend: ContentBackend) -> Self {
        Self {
            db,
            storage,
            backend,
        }
    }

    /// Persist content and return the new blob id. Blobs are immutable;
    /// callers pass fresh bytes for every document version.
    pub async fn save(&self, content: String, mime_type: &str) -> Result<String, AppError> {
        let blob = match self.backend {
            ContentBackend::ObjectStore => {
                let blob = ContentBlob::in_object_store(String::new(), mime_type.to_owned());
                let storage_key = format!("content/{}", blob.id);
                self.storage
                    .put(&storage_key, Bytes::from(content.into_bytes()))
                    .await?;

                ContentBlob {
                    storage_key: Some(storage_key),
                    ..blob
                }
            }
            ContentBackend::Database => ContentBlob::inline(content, mime_type.to_owned()),
        };

        let id = blob.id.clone();
        self.db.store_item(blob).await.map_err(AppError::Database)?;
        tracing::debug!(content_id = %id, backend = ?self.backend, "content blob saved");

        Ok(id)
    }

    /// Load content text by blob id, dispatching on the stored backend.
    pub async fn load(&self, content_id: &str) -> Result<String, AppError> {
        let blob: ContentBlob = self
            .db
            .get_item(content_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content blob {content_id}")))?;

        match blob.storage_backend {
            StorageBackend::Database => blob.content.ok_or_else(|| {
                AppError::InternalError(format!("content blob {content_id} has no inline content"))
            }),
            StorageBackend::ObjectStore => {
                let key = blob.storage_key.ok_or_else(|| {
                    AppError::InternalError(format!(
                        "content blob {content_id} has no storage key"
                    ))
                })?;
                let bytes = self.storage.get(&key).await?;

                String::from_utf8(bytes.to_vec()).map_err(|e| {
                    AppError::Processing(format!("content blob {content_id} is not utf-8: {e}"))
                })
            }
        }
    }
}
