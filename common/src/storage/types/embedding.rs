use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Embedding, "embedding", {
    document_id: String,
    chunk_index: u32,
    chunk_start_offset: u64,
    chunk_end_offset: u64,
    embedding: Vec<f32>,
    model_name: String
});

impl Embedding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        chunk_index: u32,
        chunk_start_offset: u64,
        chunk_end_offset: u64,
        embedding: Vec<f32>,
        model_name: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            chunk_index,
            chunk_start_offset,
            chunk_end_offset,
            embedding,
            model_name,
        }
    }

    /// Embeddings for one document, ordered by chunk index.
    pub async fn get_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE document_id = $document_id ORDER BY chunk_index ASC",
                table = Self::table_name()
            ))
            .bind(("document_id", document_id.to_owned()))
            .await?;

        Ok(response.take::<Vec<Self>>(0)?)
    }

    /// Atomically replace the embedding sets of the given documents: delete
    /// every existing row for those document ids, then insert the new rows,
    /// all inside one transaction. A reader never observes a mix of the old
    /// and new set.
    pub async fn replace_for_documents(
        document_ids: &[String],
        rows: Vec<Self>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let mut query = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "DELETE {table} WHERE document_id IN $document_ids;",
                table = Self::table_name()
            ))
            .bind(("document_ids", document_ids.to_vec()));

        for (i, row) in rows.into_iter().enumerate() {
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $id_{i}) CONTENT $row_{i};",
                    table = Self::table_name()
                ))
                .bind((format!("id_{i}"), row.id.clone()))
                .bind((format!("row_{i}"), row));
        }

        query.query("COMMIT TRANSACTION;").await?.check()?;

        Ok(())
    }

    pub async fn delete_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "DELETE {table} WHERE document_id = $document_id",
                table = Self::table_name()
            ))
            .bind(("document_id", document_id.to_owned()))
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
        let db = SurrealDbClient::memory("embedding_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("initialize schema");
        db
    }

    fn rows(document_id: &str, count: u32, model: &str) -> Vec<Embedding> {
        (0..count)
            .map(|i| {
                Embedding::new(
                    document_id.to_string(),
                    i,
                    u64::from(i) * 10,
                    u64::from(i) * 10 + 10,
                    vec![0.1, 0.2, 0.3],
                    model.to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn replace_swaps_old_rows_for_new_atomically() {
        let db = memory_db().await;

        Embedding::replace_for_documents(&["doc-1".into()], rows("doc-1", 3, "model-a"), &db)
            .await
            .expect("first replace");

        let stored = Embedding::get_for_document("doc-1", &db).await.expect("get");
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|e| e.model_name == "model-a"));

        Embedding::replace_for_documents(&["doc-1".into()], rows("doc-1", 5, "model-b"), &db)
            .await
            .expect("second replace");

        let stored = Embedding::get_for_document("doc-1", &db).await.expect("get");
        assert_eq!(stored.len(), 5, "no old rows may survive the replace");
        assert!(stored.iter().all(|e| e.model_name == "model-b"));

        // Chunk indexes are contiguous from zero and ordered.
        let indexes: Vec<u32> = stored.iter().map(|e| e.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn replace_only_touches_named_documents() {
        let db = memory_db().await;

        Embedding::replace_for_documents(&["doc-1".into()], rows("doc-1", 2, "m"), &db)
            .await
            .expect("replace doc-1");
        Embedding::replace_for_documents(&["doc-2".into()], rows("doc-2", 4, "m"), &db)
            .await
            .expect("replace doc-2");

        Embedding::replace_for_documents(&["doc-2".into()], rows("doc-2", 1, "m"), &db)
            .await
            .expect("re-replace doc-2");

        assert_eq!(
            Embedding::get_for_document("doc-1", &db).await.expect("get").len(),
            2
        );
        assert_eq!(
            Embedding::get_for_document("doc-2", &db).await.expect("get").len(),
            1
        );
    }

    #[tokio::test]
    async fn re_ingesting_identical_rows_is_idempotent() {
        let db = memory_db().await;

        let first = rows("doc-1", 3, "model-a");
        Embedding::replace_for_documents(&["doc-1".into()], first.clone(), &db)
            .await
            .expect("replace");
        Embedding::replace_for_documents(&["doc-1".into()], rows("doc-1", 3, "model-a"), &db)
            .await
            .expect("replace again");

        let stored = Embedding::get_for_document("doc-1", &db).await.expect("get");
        assert_eq!(stored.len(), 3);
        let spans: Vec<(u64, u64)> = stored
            .iter()
            .map(|e| (e.chunk_start_offset, e.chunk_end_offset))
            .collect();
        assert_eq!(spans, vec![(0, 10), (10, 20), (20, 30)]);
    }

    #[tokio::test]
    async fn delete_for_document_removes_the_set() {
        let db = memory_db().await;

        Embedding::replace_for_documents(&["doc-1".into()], rows("doc-1", 2, "m"), &db)
            .await
            .expect("replace");
        Embedding::delete_for_document("doc-1", &db).await.expect("delete");

        assert!(Embedding::get_for_document("doc-1", &db)
            .await
            .expect("get")
            .is_empty());
    }
}
