//! Canonical document persistence.
//!
//! Documents are keyed by `(source_key, external_id)`. Every write that
//! actually changes a field bumps `revision`; the materializer compares it
//! against the revision each feed entry was projected from.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::PipelineError;
use crate::models::{
    from_unix, AnalysisStatus, CanonicalDocument, CanonicalDraft, EnrichmentUpdate, ImpactScore,
};

const DOC_COLUMNS: &str = "d.id, d.source_key, d.external_id, d.fetched_at, d.title, d.agency, \
    d.summary, d.key_points, d.impact_score, d.political_score, d.source_url, d.published_at, \
    d.document_type, d.pdf_url, d.analysis_status, d.revision, d.created_at, d.updated_at";

/// Result of [`upsert_canonical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    /// No document existed for the natural key before this call.
    pub created: bool,
    /// A row was inserted or at least one field changed.
    pub changed: bool,
}

/// Insert or refresh the canonical document for a natural key.
///
/// Source-derived fields are overwritten. The summary is only replaced while
/// the document has not been through enrichment, so re-canonicalizing never
/// erases AI output. An upsert that changes nothing leaves the row untouched.
pub async fn upsert_canonical(
    conn: &mut SqliteConnection,
    draft: &CanonicalDraft,
) -> Result<UpsertOutcome, PipelineError> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM canonical_documents WHERE source_key = ? AND external_id = ?",
    )
    .bind(&draft.source_key)
    .bind(&draft.external_id)
    .fetch_optional(&mut *conn)
    .await?;

    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO canonical_documents (
            source_key, external_id, fetched_at, title, agency, summary, key_points,
            source_url, published_at, document_type, pdf_url, revision, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(source_key, external_id) DO UPDATE SET
            fetched_at = excluded.fetched_at,
            title = excluded.title,
            agency = excluded.agency,
            summary = CASE WHEN canonical_documents.analysis_status IS NULL
                           THEN excluded.summary ELSE canonical_documents.summary END,
            source_url = excluded.source_url,
            published_at = excluded.published_at,
            document_type = excluded.document_type,
            pdf_url = excluded.pdf_url,
            revision = canonical_documents.revision + 1,
            updated_at = excluded.updated_at
        WHERE canonical_documents.title IS NOT excluded.title
           OR canonical_documents.agency IS NOT excluded.agency
           OR (canonical_documents.analysis_status IS NULL
               AND canonical_documents.summary IS NOT excluded.summary)
           OR canonical_documents.source_url IS NOT excluded.source_url
           OR canonical_documents.published_at IS NOT excluded.published_at
           OR canonical_documents.document_type IS NOT excluded.document_type
           OR canonical_documents.pdf_url IS NOT excluded.pdf_url
        "#,
    )
    .bind(&draft.source_key)
    .bind(&draft.external_id)
    .bind(draft.fetched_at.timestamp())
    .bind(&draft.title)
    .bind(&draft.agency)
    .bind(&draft.summary)
    .bind(&draft.source_url)
    .bind(draft.published_at.timestamp())
    .bind(&draft.document_type)
    .bind(&draft.pdf_url)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM canonical_documents WHERE source_key = ? AND external_id = ?",
    )
    .bind(&draft.source_key)
    .bind(&draft.external_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(UpsertOutcome {
        id,
        created: existing.is_none(),
        changed: result.rows_affected() > 0,
    })
}

/// Write enrichment output back onto a document.
pub async fn apply_enrichment(
    conn: &mut SqliteConnection,
    id: i64,
    update: &EnrichmentUpdate,
) -> Result<(), PipelineError> {
    let key_points = encode_key_points(&update.key_points)?;
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        UPDATE canonical_documents SET
            summary = ?,
            key_points = ?,
            impact_score = ?,
            political_score = ?,
            analysis_status = ?,
            revision = revision + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&update.summary)
    .bind(&key_points)
    .bind(update.impact_score.map(|s| s.as_str()))
    .bind(update.political_score)
    .bind(update.status.as_str())
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Documents missing any AI-derived field, in id order.
///
/// With `pending_only`, documents that already went through a write-back
/// attempt (complete or degraded) are excluded.
pub async fn list_needing_enrichment(
    pool: &SqlitePool,
    batch_size: i64,
    pending_only: bool,
) -> Result<Vec<CanonicalDocument>, PipelineError> {
    let sql = format!(
        r#"
        SELECT {}
        FROM canonical_documents d
        WHERE (d.impact_score IS NULL OR d.political_score IS NULL OR d.key_points = '[]')
          AND (? = 0 OR d.analysis_status IS NULL)
        ORDER BY d.id ASC
        LIMIT ?
        "#,
        DOC_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(pending_only as i64)
        .bind(batch_size)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_document).collect()
}

/// Documents that were never projected, or changed since their last projection.
pub async fn list_needing_materialization(
    pool: &SqlitePool,
    batch_size: i64,
) -> Result<Vec<CanonicalDocument>, PipelineError> {
    let sql = format!(
        r#"
        SELECT {}
        FROM canonical_documents d
        LEFT JOIN feed_entries f ON f.canonical_document_id = d.id
        WHERE f.id IS NULL OR f.source_revision < d.revision
        ORDER BY d.id ASC
        LIMIT ?
        "#,
        DOC_COLUMNS
    );

    let rows = sqlx::query(&sql).bind(batch_size).fetch_all(pool).await?;
    rows.iter().map(row_to_document).collect()
}

pub async fn get_by_id(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<CanonicalDocument>, PipelineError> {
    let sql = format!("SELECT {} FROM canonical_documents d WHERE d.id = ?", DOC_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_document).transpose()
}

pub async fn get_by_natural_key(
    pool: &SqlitePool,
    source_key: &str,
    external_id: &str,
) -> Result<Option<CanonicalDocument>, PipelineError> {
    let sql = format!(
        "SELECT {} FROM canonical_documents d WHERE d.source_key = ? AND d.external_id = ?",
        DOC_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(source_key)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_document).transpose()
}

pub async fn count(pool: &SqlitePool) -> Result<i64, PipelineError> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM canonical_documents")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub(crate) fn encode_key_points(points: &[String]) -> Result<String, PipelineError> {
    serde_json::to_string(points).map_err(|e| PipelineError::Database(sqlx::Error::Encode(e.into())))
}

pub(crate) fn decode_key_points(raw: &str) -> Result<Vec<String>, PipelineError> {
    serde_json::from_str(raw).map_err(|e| PipelineError::Database(sqlx::Error::Decode(e.into())))
}

pub(crate) fn decode_impact(raw: Option<String>) -> Result<Option<ImpactScore>, PipelineError> {
    raw.map(|s| s.parse::<ImpactScore>())
        .transpose()
        .map_err(|e| PipelineError::Database(sqlx::Error::Decode(e.into())))
}

fn row_to_document(row: &SqliteRow) -> Result<CanonicalDocument, PipelineError> {
    let key_points: String = row.try_get("key_points")?;
    let status: Option<String> = row.try_get("analysis_status")?;

    Ok(CanonicalDocument {
        id: row.try_get("id")?,
        source_key: row.try_get("source_key")?,
        external_id: row.try_get("external_id")?,
        fetched_at: from_unix(row.try_get("fetched_at")?),
        title: row.try_get("title")?,
        agency: row.try_get("agency")?,
        summary: row.try_get("summary")?,
        key_points: decode_key_points(&key_points)?,
        impact_score: decode_impact(row.try_get("impact_score")?)?,
        political_score: row.try_get("political_score")?,
        source_url: row.try_get("source_url")?,
        published_at: from_unix(row.try_get("published_at")?),
        document_type: row.try_get("document_type")?,
        pdf_url: row.try_get("pdf_url")?,
        analysis_status: AnalysisStatus::from_db(status.as_deref()),
        revision: row.try_get("revision")?,
        created_at: from_unix(row.try_get("created_at")?),
        updated_at: from_unix(row.try_get("updated_at")?),
    })
}
