//! Raw Store: every fetched upstream payload, keyed by `(source_key, external_id)`.
//!
//! Rows are inserted once and mutated exactly once, when the canonicalizer
//! links them to a canonical document. Nothing here deletes.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::PipelineError;
use crate::models::{from_unix, RawDocument};

/// Insert a raw payload unless its natural key is already present.
///
/// Returns `true` when a row was written, `false` when the key existed.
/// Relies on the table's uniqueness constraint (`ON CONFLICT DO NOTHING`),
/// so concurrent or repeated calls cannot produce duplicates.
pub async fn insert_if_absent(
    conn: &mut SqliteConnection,
    source_key: &str,
    external_id: &str,
    raw_payload: &[u8],
    fetched_at: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let digest = payload_digest(raw_payload);
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO raw_documents (source_key, external_id, raw_data, payload_sha256, fetched_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_key, external_id) DO NOTHING
        "#,
    )
    .bind(source_key)
    .bind(external_id)
    .bind(raw_payload)
    .bind(&digest)
    .bind(fetched_at.timestamp())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    let stored: Option<String> = sqlx::query_scalar(
        "SELECT payload_sha256 FROM raw_documents WHERE source_key = ? AND external_id = ?",
    )
    .bind(source_key)
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?;

    if stored.as_deref() != Some(digest.as_str()) {
        debug!(
            source_key,
            external_id, "upstream payload changed since first capture; keeping original"
        );
    }

    Ok(false)
}

/// Next page of unlinked rows with `id > after_id`, in insertion order.
///
/// The cursor lets a caller skip rows it has decided to leave unlinked
/// (quarantine) without re-reading them forever.
pub async fn list_unlinked(
    pool: &SqlitePool,
    after_id: i64,
    batch_size: i64,
) -> Result<Vec<RawDocument>, PipelineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_key, external_id, raw_data, payload_sha256, fetched_at,
               canonical_document_id, created_at
        FROM raw_documents
        WHERE canonical_document_id IS NULL AND id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(after_id)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_raw).collect()
}

/// Point a raw row at its canonical document.
///
/// Must run on the same transaction as the canonical upsert. A row that is
/// already linked is left alone and treated as success, so a retried
/// canonicalization is a no-op.
pub async fn link_to_canonical(
    conn: &mut SqliteConnection,
    raw_id: i64,
    canonical_id: i64,
) -> Result<(), PipelineError> {
    let result = sqlx::query(
        "UPDATE raw_documents SET canonical_document_id = ? \
         WHERE id = ? AND canonical_document_id IS NULL",
    )
    .bind(canonical_id)
    .bind(raw_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let existing: Option<Option<i64>> =
        sqlx::query_scalar("SELECT canonical_document_id FROM raw_documents WHERE id = ?")
            .bind(raw_id)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        None => Err(PipelineError::Database(sqlx::Error::RowNotFound)),
        Some(Some(linked)) => {
            if linked != canonical_id {
                debug!(raw_id, linked, canonical_id, "raw document already linked elsewhere");
            }
            Ok(())
        }
        Some(None) => Err(PipelineError::Database(sqlx::Error::Protocol(format!(
            "raw document {} still unlinked after link attempt",
            raw_id
        )))),
    }
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<RawDocument>, PipelineError> {
    let row = sqlx::query(
        r#"
        SELECT id, source_key, external_id, raw_data, payload_sha256, fetched_at,
               canonical_document_id, created_at
        FROM raw_documents WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_raw).transpose()
}

pub async fn get_by_natural_key(
    pool: &SqlitePool,
    source_key: &str,
    external_id: &str,
) -> Result<Option<RawDocument>, PipelineError> {
    let row = sqlx::query(
        r#"
        SELECT id, source_key, external_id, raw_data, payload_sha256, fetched_at,
               canonical_document_id, created_at
        FROM raw_documents WHERE source_key = ? AND external_id = ?
        "#,
    )
    .bind(source_key)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_raw).transpose()
}

pub async fn count(pool: &SqlitePool) -> Result<i64, PipelineError> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_documents")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn count_unlinked(pool: &SqlitePool) -> Result<i64, PipelineError> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM raw_documents WHERE canonical_document_id IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(n)
}

fn row_to_raw(row: &SqliteRow) -> Result<RawDocument, PipelineError> {
    Ok(RawDocument {
        id: row.try_get("id")?,
        source_key: row.try_get("source_key")?,
        external_id: row.try_get("external_id")?,
        raw_payload: row.try_get("raw_data")?,
        payload_sha256: row.try_get("payload_sha256")?,
        fetched_at: from_unix(row.try_get("fetched_at")?),
        canonical_document_id: row.try_get("canonical_document_id")?,
        created_at: from_unix(row.try_get("created_at")?),
    })
}

fn payload_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}
