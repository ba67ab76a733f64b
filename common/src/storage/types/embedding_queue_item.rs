use surrealdb::RecordId;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Batched,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

stored_object!(EmbeddingQueueItem, "embedding_queue_item", {
    document_id: String,
    status: QueueItemStatus,
    batch_job_id: Option<String>,
    #[serde(
        serialize_with = "to_db_datetime_opt",
        deserialize_with = "from_db_datetime_opt",
        default
    )]
    processed_at: Option<DateTime<Utc>>,
    error_message: Option<String>
});

impl EmbeddingQueueItem {
    fn new(document_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            status: QueueItemStatus::Pending,
            batch_job_id: None,
            processed_at: None,
            error_message: None,
        }
    }

    fn record_ids(ids: &[String]) -> Vec<RecordId> {
        ids.iter()
            .map(|id| RecordId::from_table_key(Self::table_name(), id))
            .collect()
    }

    /// Enqueue a document for embedding. A document has at most one live row:
    /// if a non-terminal row already exists it is returned unchanged.
    pub async fn enqueue(document_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE document_id = $document_id \
                 AND status IN ['pending', 'batched', 'processing'] LIMIT 1",
                table = Self::table_name()
            ))
            .bind(("document_id", document_id.to_owned()))
            .await?;

        if let Some(existing) = response.take::<Vec<Self>>(0)?.into_iter().next() {
            return Ok(existing);
        }

        let item = Self::new(document_id.to_owned());
        let stored = db.store_item(item.clone()).await?;

        Ok(stored.unwrap_or(item))
    }

    /// Pending rows not yet assigned to a batch, oldest first.
    pub async fn claim_pending(limit: usize, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE status = $status AND batch_job_id = NONE \
                 ORDER BY created_at ASC LIMIT $limit",
                table = Self::table_name()
            ))
            .bind(("status", QueueItemStatus::Pending))
            .bind(("limit", limit))
            .await?;

        Ok(response.take::<Vec<Self>>(0)?)
    }

    /// Assign a set of pending rows to a batch in a single transaction.
    pub async fn assign_to_batch(
        batch_job_id: &str,
        ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        db.client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "UPDATE {table} SET status = $status, batch_job_id = $batch_job_id, \
                 updated_at = time::now() WHERE id IN $ids;",
                table = Self::table_name()
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("status", QueueItemStatus::Batched))
            .bind(("batch_job_id", batch_job_id.to_owned()))
            .bind(("ids", Self::record_ids(ids)))
            .await?
            .check()?;

        Ok(())
    }

    /// Every row assigned to the batch, regardless of status.
    pub async fn for_batch(batch_job_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE batch_job_id = $batch_job_id ORDER BY created_at ASC",
                table = Self::table_name()
            ))
            .bind(("batch_job_id", batch_job_id.to_owned()))
            .await?;

        Ok(response.take::<Vec<Self>>(0)?)
    }

    /// Transition every batched row of a batch to processing at submission time.
    pub async fn mark_processing(batch_job_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE {table} SET status = $next, updated_at = time::now() \
                 WHERE batch_job_id = $batch_job_id AND status = $current",
                table = Self::table_name()
            ))
            .bind(("next", QueueItemStatus::Processing))
            .bind(("current", QueueItemStatus::Batched))
            .bind(("batch_job_id", batch_job_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_completed(ids: &[String], db: &SurrealDbClient) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        db.client
            .query(format!(
                "UPDATE {table} SET status = $status, processed_at = time::now(), \
                 updated_at = time::now() WHERE id IN $ids",
                table = Self::table_name()
            ))
            .bind(("status", QueueItemStatus::Completed))
            .bind(("ids", Self::record_ids(ids)))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_failed(
        ids: &[String],
        error_message: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }

        db.client
            .query(format!(
                "UPDATE {table} SET status = $status, processed_at = time::now(), \
                 error_message = $error, updated_at = time::now() WHERE id IN $ids",
                table = Self::table_name()
            ))
            .bind(("status", QueueItemStatus::Failed))
            .bind(("error", error_message.to_owned()))
            .bind(("ids", Self::record_ids(ids)))
            .await?
            .check()?;

        Ok(())
    }
}
