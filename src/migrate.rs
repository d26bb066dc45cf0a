use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Documents table: one row per ingestible file, mutated only by the
    // orchestrator that holds the processing lease.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            storage_key TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'PENDING',
            remote_file_ref TEXT,
            transcript TEXT,
            metadata_json TEXT,
            embedding BLOB,
            owner_scope TEXT,
            error_stage TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Derived tags, one per classification keyword.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_tags (
            document_id TEXT NOT NULL,
            tag_key TEXT NOT NULL,
            tag_value TEXT NOT NULL,
            UNIQUE(document_id, tag_key, tag_value),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Known document categories, fed to the metadata-extraction prompt.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_categories (
            name TEXT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Analytical templates. Owned by admin tooling; read-only here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_frameworks (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            schema_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Filled-in framework instances; `version` backs optimistic updates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_instances (
            id TEXT PRIMARY KEY,
            framework_id TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            data_json TEXT NOT NULL DEFAULT '{}',
            completeness REAL NOT NULL DEFAULT 0,
            confidence REAL NOT NULL DEFAULT 0,
            source_document_ids TEXT NOT NULL DEFAULT '[]',
            owner_scope TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (framework_id) REFERENCES knowledge_frameworks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_tags_document_id ON document_tags(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_instances_framework_id ON knowledge_instances(framework_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
