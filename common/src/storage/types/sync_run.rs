use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

stored_object!(SyncRun, "sync_run", {
    source_id: String,
    sync_type: SyncType,
    status: SyncRunStatus,
    documents_scanned: u64,
    documents_emitted: u64,
    error_message: Option<String>
});

impl SyncRun {
    pub async fn create(
        source_id: &str,
        sync_type: SyncType,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let run = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id: source_id.to_owned(),
            sync_type,
            status: SyncRunStatus::Running,
            documents_scanned: 0,
            documents_emitted: 0,
            error_message: None,
        };

        let stored = db.store_item(run.clone()).await?;

        Ok(stored.unwrap_or(run))
    }

    pub async fn has_running_for_source(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT VALUE id FROM {table} WHERE source_id = $source_id \
                 AND status = $status LIMIT 1",
                table = Self::table_name()
            ))
            .bind(("source_id", source_id.to_owned()))
            .bind(("status", SyncRunStatus::Running))
            .await?;

        let existing: Vec<surrealdb::sql::Thing> = response.take(0)?;

        Ok(!existing.is_empty())
    }

    pub async fn increment_scanned(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET documents_scanned += 1, \
                 updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn increment_emitted(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET documents_emitted += 1, \
                 updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn mark_completed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET status = $status, updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", SyncRunStatus::Completed))
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
                 error_message = $error, updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("status", SyncRunStatus::Failed))
            .bind(("error", error_message.to_owned()))
            .await?
            .check()?;

        Ok(())
    }
}
