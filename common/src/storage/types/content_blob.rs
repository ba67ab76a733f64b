use uuid::Uuid;

use crate::stored_object;

/// Where the bytes of a blob actually live.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    ObjectStore,
    Database,
}

stored_object!(ContentBlob, "content_blob", {
    storage_backend: StorageBackend,
    storage_key: Option<String>,
    content: Option<String>,
    mime_type: String
});

impl ContentBlob {
    /// A blob whose bytes live in the object store under `storage_key`.
    pub fn in_object_store(storage_key: String, mime_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            storage_backend: StorageBackend::ObjectStore,
            storage_key: Some(storage_key),
            content: None,
            mime_type,
        }
    }

    /// A blob stored inline in the database row.
    pub fn inline(content: String, mime_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            storage_backend: StorageBackend::Database,
            storage_key: None,
            content: Some(content),
            mime_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_backend_fields_exclusively() {
        let object = ContentBlob::in_object_store("content/abc".into(), "text/plain".into());
        assert_eq!(object.storage_backend, StorageBackend::ObjectStore);
        assert_eq!(object.storage_key.as_deref(), Some("content/abc"));
        assert!(object.content.is_none());

        let inline = ContentBlob::inline("the text".into(), "text/plain".into());
        assert_eq!(inline.storage_backend, StorageBackend::Database);
        assert!(inline.storage_key.is_none());
        assert_eq!(inline.content.as_deref(), Some("the text"));
    }
}
