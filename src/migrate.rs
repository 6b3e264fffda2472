use sqlx::SqlitePool;

use crate::error::PipelineError;

/// Create every table and index used by the pipeline. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), PipelineError> {
    // Upstream agency directory
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fr_agency_id INTEGER NOT NULL UNIQUE,
            raw_name TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            short_name TEXT,
            slug TEXT NOT NULL DEFAULT '',
            description TEXT,
            url TEXT,
            json_url TEXT,
            parent_id INTEGER,
            raw_data TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Canonical documents: one per (source_key, external_id)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_key TEXT NOT NULL,
            external_id TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            title TEXT NOT NULL,
            agency TEXT,
            summary TEXT NOT NULL,
            key_points TEXT NOT NULL DEFAULT '[]',
            impact_score TEXT CHECK (impact_score IN ('low', 'medium', 'high')),
            political_score INTEGER CHECK (political_score BETWEEN -100 AND 100),
            source_url TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            document_type TEXT,
            pdf_url TEXT,
            analysis_status TEXT,
            revision INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_canonical_documents_natural_key \
         ON canonical_documents(source_key, external_id)",
    )
    .execute(pool)
    .await?;

    // Raw captures of upstream payloads
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_key TEXT NOT NULL,
            external_id TEXT NOT NULL,
            raw_data BLOB NOT NULL,
            payload_sha256 TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            canonical_document_id INTEGER REFERENCES canonical_documents(id),
            created_at INTEGER NOT NULL,
            UNIQUE(source_key, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Feed projection: one per canonical document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feed_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_document_id INTEGER NOT NULL UNIQUE REFERENCES canonical_documents(id),
            title TEXT NOT NULL,
            short_text TEXT NOT NULL,
            key_points TEXT NOT NULL DEFAULT '[]',
            political_score INTEGER,
            impact_score TEXT,
            source_url TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            source_revision INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_documents_unlinked \
         ON raw_documents(id) WHERE canonical_document_id IS NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_canonical_documents_published_at \
         ON canonical_documents(published_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feed_entries_published_at \
         ON feed_entries(published_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
