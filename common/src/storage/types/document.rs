use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Cross-source metadata carried on every normalized document.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DocumentPermissions {
    pub public: bool,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

impl Default for DocumentPermissions {
    fn default() -> Self {
        Self {
            public: false,
            allowed_users: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    None,
    Pending,
    Processing,
    Completed,
    Failed,
}

stored_object!(Document, "document", {
    external_id: String,
    source_id: String,
    title: String,
    mime_type: String,
    url: Option<String>,
    metadata: DocumentMetadata,
    permissions: DocumentPermissions,
    #[serde(default)]
    attributes: serde_json::Value,
    content_id: String,
    embedding_status: EmbeddingStatus
});

/// Fields a connector provides when emitting a document. The runtime fills in
/// identity, timestamps and embedding status.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub external_id: String,
    pub title: String,
    pub mime_type: String,
    pub url: Option<String>,
    pub metadata: DocumentMetadata,
    pub permissions: DocumentPermissions,
    pub attributes: serde_json::Value,
    pub content_id: String,
}

/// Result of upserting a document by its external id.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub document: Document,
    /// True when the emitted content blob differs from the stored one.
    pub content_changed: bool,
    /// Embedding status of the pre-existing row, if any.
    pub previous_status: Option<EmbeddingStatus>,
}

impl Document {
    pub fn new(source_id: String, draft: NewDocument) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            external_id: draft.external_id,
            source_id,
            title: draft.title,
            mime_type: draft.mime_type,
            url: draft.url,
            metadata: draft.metadata,
            permissions: draft.permissions,
            attributes: draft.attributes,
            content_id: draft.content_id,
            embedding_status: EmbeddingStatus::None,
        }
    }

    pub async fn find_by_external_id(
        external_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE external_id = $external_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("external_id", external_id.to_owned()))
            .await?;

        Ok(response.take::<Vec<Self>>(0)?.into_iter().next())
    }

    /// Upsert by `external_id`. Re-emission keeps the existing row identity and
    /// replaces every connector-owned field.
    pub async fn upsert_by_external_id(
        source_id: &str,
        draft: NewDocument,
        db: &SurrealDbClient,
    ) -> Result<UpsertOutcome, AppError> {
        match Self::find_by_external_id(&draft.external_id, db).await? {
            Some(existing) => {
                let content_changed = existing.content_id != draft.content_id;
                let previous_status = existing.embedding_status;

                let updated = Self {
                    id: existing.id.clone(),
                    created_at: existing.created_at,
                    updated_at: Utc::now(),
                    external_id: draft.external_id,
                    source_id: source_id.to_owned(),
                    title: draft.title,
                    mime_type: draft.mime_type,
                    url: draft.url,
                    metadata: draft.metadata,
                    permissions: draft.permissions,
                    attributes: draft.attributes,
                    content_id: draft.content_id,
                    embedding_status: existing.embedding_status,
                };

                let document: Option<Self> = db
                    .client
                    .update((Self::table_name(), existing.id))
                    .content(updated.clone())
                    .await?;

                Ok(UpsertOutcome {
                    document: document.unwrap_or(updated),
                    content_changed,
                    previous_status: Some(previous_status),
                })
            }
            None => {
                let document = Self::new(source_id.to_owned(), draft);
                let stored = db.store_item(document.clone()).await?;

                Ok(UpsertOutcome {
                    document: stored.unwrap_or(document),
                    content_changed: true,
                    previous_status: None,
                })
            }
        }
    }

    pub async fn set_embedding_status(
        id: &str,
        status: EmbeddingStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET embedding_status = $status, updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .await?
            .check()?;

        Ok(())
    }

    /// Transition the embedding status of many documents at once.
    pub async fn set_embedding_status_many(
        ids: &[String],
        status: EmbeddingStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        let record_ids: Vec<surrealdb::RecordId> = ids
            .iter()
            .map(|id| surrealdb::RecordId::from_table_key(Self::table_name(), id))
            .collect();

        db.client
            .query(format!(
                "UPDATE {table} SET embedding_status = $status, updated_at = time::now() WHERE id IN $ids",
                table = Self::table_name()
            ))
            .bind(("status", status))
            .bind(("ids", record_ids))
            .await?
            .check()?;

        Ok(())
    }
}
