use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Pending,
    Preparing,
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl BatchJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

stored_object!(BatchJob, "batch_job", {
    status: BatchJobStatus,
    provider: String,
    external_job_id: Option<String>,
    input_storage_path: Option<String>,
    output_storage_path: Option<String>,
    document_count: u64,
    #[serde(
        serialize_with = "to_db_datetime_opt",
        deserialize_with = "from_db_datetime_opt",
        default
    )]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "to_db_datetime_opt",
        deserialize_with = "from_db_datetime_opt",
        default
    )]
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>
});

impl BatchJob {
    pub async fn create(
        provider: &str,
        document_count: u64,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let job = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            status: BatchJobStatus::Pending,
            provider: provider.to_owned(),
            external_job_id: None,
            input_storage_path: None,
            output_storage_path: None,
            document_count,
            submitted_at: None,
            completed_at: None,
            error_message: None,
        };

        let stored = db.store_item(job.clone()).await?;

        Ok(stored.unwrap_or(job))
    }

    /// Jobs the monitor loop still has to watch.
    pub async fn get_active(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE status IN ['submitted', 'processing'] \
                 ORDER BY created_at ASC",
                table = Self::table_name()
            ))
            .await?;

        Ok(response.take::<Vec<Self>>(0)?)
    }

    pub async fn mark_preparing(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::set_status(id, BatchJobStatus::Preparing, db).await
    }

    /// Stamp the submission: external job handle, manifest locations and
    /// `submitted_at`.
    pub async fn mark_submitted(
        id: &str,
        external_job_id: &str,
        input_storage_path: &str,
        output_storage_path: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET status = $status, \
                 external_job_id = $external_job_id, input_storage_path = $input, \
                 output_storage_path = $output, submitted_at = time::now(), \
                 updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", BatchJobStatus::Submitted))
            .bind(("external_job_id", external_job_id.to_owned()))
            .bind(("input", input_storage_path.to_owned()))
            .bind(("output", output_storage_path.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_processing(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::set_status(id, BatchJobStatus::Processing, db).await
    }

    pub async fn mark_completed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET status = $status, \
                 completed_at = time::now(), updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", BatchJobStatus::Completed))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_failed(
        id: &str,
        error_message: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET status = $status, \
                 error_message = $error, completed_at = time::now(), updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", BatchJobStatus::Failed))
            .bind(("error", error_message.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    async fn set_status(
        id: &str,
        status: BatchJobStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET status = $status, updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", status))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("batch_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("initialize schema");
        db
    }

    #[tokio::test]
    async fn success_path_stamps_monotonic_timestamps() {
        let db = memory_db().await;

        let job = BatchJob::create("remote_batch", 4, &db).await.expect("create");
        assert_eq!(job.status, BatchJobStatus::Pending);
        assert_eq!(job.document_count, 4);

        BatchJob::mark_preparing(&job.id, &db).await.expect("preparing");
        BatchJob::mark_submitted(
            &job.id,
            "job-ext-1",
            "batch/input/j.jsonl",
            "batch/output/j",
            &db,
        )
        .await
        .expect("submitted");
        BatchJob::mark_completed(&job.id, &db).await.expect("completed");

        let fetched: BatchJob = db.get_item(&job.id).await.expect("fetch").expect("exists");
        assert_eq!(fetched.status, BatchJobStatus::Completed);
        assert_eq!(fetched.external_job_id.as_deref(), Some("job-ext-1"));

        let submitted_at = fetched.submitted_at.expect("submitted_at set");
        let completed_at = fetched.completed_at.expect("completed_at set");
        assert!(fetched.created_at <= submitted_at);
        assert!(submitted_at <= completed_at);
    }

    #[tokio::test]
    async fn failed_jobs_carry_the_provider_message() {
        let db = memory_db().await;

        let job = BatchJob::create("remote_batch", 2, &db).await.expect("create");
        BatchJob::mark_failed(&job.id, "model endpoint unavailable", &db)
            .await
            .expect("failed");

        let fetched: BatchJob = db.get_item(&job.id).await.expect("fetch").expect("exists");
        assert_eq!(fetched.status, BatchJobStatus::Failed);
        assert_eq!(
            fetched.error_message.as_deref(),
            Some("model endpoint unavailable")
        );
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn get_active_returns_only_watchable_jobs() {
        let db = memory_db().await;

        let submitted = BatchJob::create("remote_batch", 1, &db).await.expect("create");
        BatchJob::mark_submitted(&submitted.id, "e1", "in", "out", &db)
            .await
            .expect("submit");

        let processing = BatchJob::create("remote_batch", 1, &db).await.expect("create");
        BatchJob::mark_submitted(&processing.id, "e2", "in", "out", &db)
            .await
            .expect("submit");
        BatchJob::mark_processing(&processing.id, &db).await.expect("processing");

        let done = BatchJob::create("remote_batch", 1, &db).await.expect("create");
        BatchJob::mark_completed(&done.id, &db).await.expect("complete");

        let _pending = BatchJob::create("remote_batch", 1, &db).await.expect("create");

        let active = BatchJob::get_active(&db).await.expect("active");
        let ids: Vec<_> = active.iter().map(|j| j.id.as_str()).collect();
        assert!(ids.contains(&submitted.id.as_str()));
        assert!(ids.contains(&processing.id.as_str()));
        assert_eq!(active.len(), 2);
    }
}
