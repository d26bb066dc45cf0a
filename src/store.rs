//! Record store: typed persistence for documents, frameworks, and
//! knowledge instances.
//!
//! Two concurrency primitives live here:
//! - the per-document processing lease, a compare-and-set on `state`, so a
//!   single document never has two concurrent pipeline runs;
//! - optimistic updates on knowledge instances via a `version` column, so
//!   two documents merging into the same instance serialize instead of
//!   racing read-modify-write.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Document, DocumentState, KnowledgeFramework, KnowledgeInstance, NewDocument, Stage, StageError,
};

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Documents ============

    pub async fn create_document(&self, new: &NewDocument) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, mime_type, size_bytes, storage_key, state, owner_scope, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.filename)
        .bind(&new.mime_type)
        .bind(new.size_bytes)
        .bind(&new.storage_key)
        .bind(&new.owner_scope)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_document).transpose()
    }

    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_tags WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn documents_in_state(&self, state: DocumentState) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM documents WHERE state = ? ORDER BY created_at ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Acquire the exclusive processing lease for a document.
    ///
    /// Without `force`, only a PENDING document can be claimed; with `force`
    /// any non-SYNCED state can be re-entered (manual re-trigger of FAILED,
    /// recovery of a run that crashed while PROCESSING, re-running a
    /// NEEDS_REVIEW document). Returns false when the claim lost the race.
    pub async fn claim_for_processing(&self, id: &str, force: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = if force {
            sqlx::query(
                "UPDATE documents SET state = 'PROCESSING', updated_at = ? WHERE id = ? AND state != 'SYNCED'",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE documents SET state = 'PROCESSING', updated_at = ? WHERE id = ? AND state = 'PENDING'",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected() == 1)
    }

    /// Persist the remote model handle as soon as the upload succeeds, so a
    /// crashed run can resume without re-uploading.
    pub async fn set_remote_ref(&self, id: &str, uri: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET remote_file_ref = ?, updated_at = ? WHERE id = ?")
            .bind(uri)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal failure: releases the lease and records the failing stage.
    pub async fn set_failed(&self, id: &str, stage: Stage, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET state = 'FAILED', error_stage = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(stage.as_str())
        .bind(message)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Single logical update at the end of a successful pipeline run:
    /// transcript, metadata, embedding, derived tags, and the NEEDS_REVIEW
    /// transition land in one transaction.
    pub async fn finalize_ingestion(
        &self,
        id: &str,
        transcript: &str,
        metadata_json: Option<&str>,
        embedding: Option<&[f32]>,
        tags: &[(String, String)],
    ) -> Result<()> {
        let blob = embedding.map(vec_to_blob);
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE documents
            SET transcript = ?, metadata_json = ?, embedding = ?,
                state = 'NEEDS_REVIEW', error_stage = NULL, error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(transcript)
        .bind(metadata_json)
        .bind(&blob)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM document_tags WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (key, value) in tags {
            sqlx::query(
                "INSERT OR IGNORE INTO document_tags (document_id, tag_key, tag_value) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn document_tags(&self, id: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT tag_key, tag_value FROM document_tags WHERE document_id = ? ORDER BY tag_key, tag_value",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("tag_key"), r.get("tag_value")))
            .collect())
    }

    // ============ Categories ============

    pub async fn add_category(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO document_categories (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_categories(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM document_categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    // ============ Frameworks ============

    pub async fn create_framework(
        &self,
        code: &str,
        name: &str,
        description: &str,
        schema_json: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO knowledge_frameworks (id, code, name, description, schema_json) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(schema_json)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_frameworks(&self) -> Result<Vec<KnowledgeFramework>> {
        let rows = sqlx::query("SELECT * FROM knowledge_frameworks ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_framework).collect())
    }

    // ============ Knowledge instances ============

    pub async fn get_instance(&self, id: &str) -> Result<Option<KnowledgeInstance>> {
        let row = sqlx::query("SELECT * FROM knowledge_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_instance).transpose()
    }

    /// Instance under this framework that already lists the document as a
    /// source (re-processing shortcut).
    pub async fn instance_containing_document(
        &self,
        framework_id: &str,
        document_id: &str,
    ) -> Result<Option<KnowledgeInstance>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM knowledge_instances
            WHERE framework_id = ?
              AND EXISTS (
                SELECT 1 FROM json_each(knowledge_instances.source_document_ids)
                WHERE json_each.value = ?
              )
            LIMIT 1
            "#,
        )
        .bind(framework_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_instance).transpose()
    }

    /// Candidate instances for the consolidation judge: same framework,
    /// same organizational scope when the document has one, bounded for
    /// prompt-size reasons.
    pub async fn candidate_instances(
        &self,
        framework_id: &str,
        owner_scope: Option<&str>,
        limit: i64,
    ) -> Result<Vec<KnowledgeInstance>> {
        let rows = if let Some(scope) = owner_scope {
            sqlx::query(
                "SELECT * FROM knowledge_instances WHERE framework_id = ? AND owner_scope = ? ORDER BY updated_at DESC LIMIT ?",
            )
            .bind(framework_id)
            .bind(scope)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT * FROM knowledge_instances WHERE framework_id = ? ORDER BY updated_at DESC LIMIT ?",
            )
            .bind(framework_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter().map(row_to_instance).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_instance(
        &self,
        framework_id: &str,
        title: &str,
        summary: Option<&str>,
        data_json: &str,
        completeness: f64,
        confidence: f64,
        source_document_ids: &[String],
        owner_scope: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let sources = serde_json::to_string(source_document_ids)?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_instances
                (id, framework_id, title, summary, data_json, completeness, confidence,
                 source_document_ids, owner_scope, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(framework_id)
        .bind(title)
        .bind(summary)
        .bind(data_json)
        .bind(completeness)
        .bind(confidence)
        .bind(&sources)
        .bind(owner_scope)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Optimistic instance update. Returns false when `expected_version`
    /// no longer matches (another run updated the instance concurrently).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_instance(
        &self,
        id: &str,
        expected_version: i64,
        title: &str,
        summary: Option<&str>,
        data_json: &str,
        completeness: f64,
        confidence: f64,
        source_document_ids: &[String],
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let sources = serde_json::to_string(source_document_ids)?;

        let result = sqlx::query(
            r#"
            UPDATE knowledge_instances
            SET title = ?, summary = ?, data_json = ?, completeness = ?, confidence = ?,
                source_document_ids = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(title)
        .bind(summary)
        .bind(data_json)
        .bind(completeness)
        .bind(confidence)
        .bind(&sources)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    let state_str: String = row.get("state");
    let state = DocumentState::parse(&state_str)
        .with_context(|| format!("unknown document state in store: {state_str}"))?;

    let error = match (
        row.get::<Option<String>, _>("error_stage"),
        row.get::<Option<String>, _>("error_message"),
    ) {
        (Some(stage), message) => Some(StageError {
            stage,
            message: message.unwrap_or_default(),
        }),
        (None, _) => None,
    };

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        storage_key: row.get("storage_key"),
        state,
        remote_file_ref: row.get("remote_file_ref"),
        transcript: row.get("transcript"),
        metadata_json: row.get("metadata_json"),
        embedding: row
            .get::<Option<Vec<u8>>, _>("embedding")
            .map(|b| blob_to_vec(&b)),
        owner_scope: row.get("owner_scope"),
        error,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_framework(row: sqlx::sqlite::SqliteRow) -> KnowledgeFramework {
    KnowledgeFramework {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        schema_json: row.get("schema_json"),
    }
}

fn row_to_instance(row: sqlx::sqlite::SqliteRow) -> Result<KnowledgeInstance> {
    let sources_json: String = row.get("source_document_ids");
    let source_document_ids: Vec<String> = serde_json::from_str(&sources_json)
        .with_context(|| "malformed source_document_ids in store")?;

    Ok(KnowledgeInstance {
        id: row.get("id"),
        framework_id: row.get("framework_id"),
        title: row.get("title"),
        summary: row.get("summary"),
        data_json: row.get("data_json"),
        completeness: row.get("completeness"),
        confidence: row.get("confidence"),
        source_document_ids,
        owner_scope: row.get("owner_scope"),
        version: row.get("version"),
    })
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn memory_store() -> RecordStore {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        RecordStore::new(pool)
    }

    fn new_doc() -> NewDocument {
        NewDocument {
            filename: "plan.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            storage_key: "documents/plan.pdf".to_string(),
            owner_scope: None,
        }
    }

    #[tokio::test]
    async fn lease_is_exclusive() {
        let store = memory_store().await;
        let id = store.create_document(&new_doc()).await.unwrap();

        assert!(store.claim_for_processing(&id, false).await.unwrap());
        // Second claim loses: the document is already PROCESSING.
        assert!(!store.claim_for_processing(&id, false).await.unwrap());
        // Force reclaims (crash recovery path).
        assert!(store.claim_for_processing(&id, true).await.unwrap());
    }

    #[tokio::test]
    async fn failed_needs_force_to_reclaim() {
        let store = memory_store().await;
        let id = store.create_document(&new_doc()).await.unwrap();

        store.claim_for_processing(&id, false).await.unwrap();
        store
            .set_failed(&id, Stage::Transcribe, "boom")
            .await
            .unwrap();

        assert!(!store.claim_for_processing(&id, false).await.unwrap());
        assert!(store.claim_for_processing(&id, true).await.unwrap());
    }

    #[tokio::test]
    async fn finalize_writes_everything_in_one_update() {
        let store = memory_store().await;
        let id = store.create_document(&new_doc()).await.unwrap();
        store.claim_for_processing(&id, false).await.unwrap();

        let embedding = vec![0.25f32, -1.5, 3.0];
        store
            .finalize_ingestion(
                &id,
                "# Plan",
                Some(r#"{"tags":["hr"]}"#),
                Some(&embedding),
                &[("topic".to_string(), "hr".to_string())],
            )
            .await
            .unwrap();

        let doc = store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::NeedsReview);
        assert_eq!(doc.transcript.as_deref(), Some("# Plan"));
        assert_eq!(doc.embedding, Some(embedding));
        assert!(doc.error.is_none());

        let tags = store.document_tags(&id).await.unwrap();
        assert_eq!(tags, vec![("topic".to_string(), "hr".to_string())]);
    }

    #[tokio::test]
    async fn optimistic_update_detects_conflict() {
        let store = memory_store().await;
        let fw = store
            .create_framework("swot", "SWOT", "strategy analysis", "{}")
            .await
            .unwrap();
        let id = store
            .create_instance(&fw, "A", None, "{}", 0.5, 0.5, &["d1".to_string()], None)
            .await
            .unwrap();

        assert!(store
            .update_instance(&id, 0, "A2", None, "{}", 0.6, 0.6, &["d1".to_string()])
            .await
            .unwrap());
        // Stale version loses.
        assert!(!store
            .update_instance(&id, 0, "A3", None, "{}", 0.7, 0.7, &["d1".to_string()])
            .await
            .unwrap());

        let instance = store.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(instance.title, "A2");
        assert_eq!(instance.version, 1);
    }

    #[tokio::test]
    async fn finds_instance_containing_document() {
        let store = memory_store().await;
        let fw = store
            .create_framework("persona", "Persona", "", "{}")
            .await
            .unwrap();
        let id = store
            .create_instance(
                &fw,
                "Buyer",
                None,
                "{}",
                0.5,
                0.5,
                &["doc-1".to_string(), "doc-2".to_string()],
                None,
            )
            .await
            .unwrap();

        let found = store
            .instance_containing_document(&fw, "doc-2")
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.id), Some(id));

        let missing = store
            .instance_containing_document(&fw, "doc-9")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn embedding_blob_round_trips() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }
}
