//! Feed entries: the display projection of canonical documents.
//!
//! One row per canonical document, keyed by its id. The whole table can be
//! rebuilt from `canonical_documents`.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::canonical_store::{decode_impact, decode_key_points, encode_key_points};
use crate::error::PipelineError;
use crate::models::{from_unix, CanonicalDocument, FeedEntry};

/// Project a canonical document into its feed entry.
///
/// Returns `true` if a row was inserted or changed. When the stored entry
/// already matches the document, nothing is written.
pub async fn upsert_for_document(
    conn: &mut SqliteConnection,
    doc: &CanonicalDocument,
) -> Result<bool, PipelineError> {
    let key_points = encode_key_points(&doc.key_points)?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO feed_entries (
            canonical_document_id, title, short_text, key_points, political_score,
            impact_score, source_url, published_at, source_revision, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(canonical_document_id) DO UPDATE SET
            title = excluded.title,
            short_text = excluded.short_text,
            key_points = excluded.key_points,
            political_score = excluded.political_score,
            impact_score = excluded.impact_score,
            source_url = excluded.source_url,
            published_at = excluded.published_at,
            source_revision = excluded.source_revision,
            updated_at = excluded.updated_at
        WHERE feed_entries.title IS NOT excluded.title
           OR feed_entries.short_text IS NOT excluded.short_text
           OR feed_entries.key_points IS NOT excluded.key_points
           OR feed_entries.political_score IS NOT excluded.political_score
           OR feed_entries.impact_score IS NOT excluded.impact_score
           OR feed_entries.source_url IS NOT excluded.source_url
           OR feed_entries.published_at IS NOT excluded.published_at
           OR feed_entries.source_revision IS NOT excluded.source_revision
        "#,
    )
    .bind(doc.id)
    .bind(&doc.title)
    .bind(&doc.summary)
    .bind(&key_points)
    .bind(doc.political_score)
    .bind(doc.impact_score.map(|s| s.as_str()))
    .bind(&doc.source_url)
    .bind(doc.published_at.timestamp())
    .bind(doc.revision)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Whether a feed entry exists for the document.
pub async fn exists_for_document(
    conn: &mut SqliteConnection,
    canonical_document_id: i64,
) -> Result<bool, PipelineError> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM feed_entries WHERE canonical_document_id = ?")
            .bind(canonical_document_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

pub async fn get_by_document_id(
    pool: &SqlitePool,
    canonical_document_id: i64,
) -> Result<Option<FeedEntry>, PipelineError> {
    let row = sqlx::query(
        r#"
        SELECT id, canonical_document_id, title, short_text, key_points, political_score,
               impact_score, source_url, published_at, source_revision, created_at, updated_at
        FROM feed_entries WHERE canonical_document_id = ?
        "#,
    )
    .bind(canonical_document_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_entry).transpose()
}

pub async fn count(pool: &SqlitePool) -> Result<i64, PipelineError> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feed_entries")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn row_to_entry(row: &SqliteRow) -> Result<FeedEntry, PipelineError> {
    let key_points: String = row.try_get("key_points")?;

    Ok(FeedEntry {
        id: row.try_get("id")?,
        canonical_document_id: row.try_get("canonical_document_id")?,
        title: row.try_get("title")?,
        short_text: row.try_get("short_text")?,
        key_points: decode_key_points(&key_points)?,
        political_score: row.try_get("political_score")?,
        impact_score: decode_impact(row.try_get("impact_score")?)?,
        source_url: row.try_get("source_url")?,
        published_at: from_unix(row.try_get("published_at")?),
        source_revision: row.try_get("source_revision")?,
        created_at: from_unix(row.try_get("created_at")?),
        updated_at: from_unix(row.try_get("updated_at")?),
    })
}
