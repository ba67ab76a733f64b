use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// The kind of external workspace a source points at. Several source types may
/// be served by one connector (the Microsoft connector covers four of them).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Hubspot,
    Notion,
    OneDrive,
    Outlook,
    OutlookCalendar,
    SharePoint,
}

stored_object!(Source, "source", {
    name: String,
    source_type: SourceType,
    config: serde_json::Value,
    credentials: serde_json::Value,
    connector_state: Option<serde_json::Value>
});

impl Source {
    pub fn new(
        name: String,
        source_type: SourceType,
        config: serde_json::Value,
        credentials: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            source_type,
            config,
            credentials,
            connector_state: None,
        }
    }

    /// Persist a connector checkpoint. Last write wins; the state is opaque to
    /// the coordinator.
    pub async fn save_state(
        id: &str,
        state: serde_json::Value,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPDATE type::thing('{table}', $id) SET connector_state = $state, \
                 updated_at = time::now()",
                table = Self::table_name()
            ))
            .bind(("id", id.to_owned()))
            .bind(("state", state))
            .await?
            .check()?;

        Ok(())
    }
}
