use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::PipelineError;
use crate::models::SourceAgency;

/// Insert or refresh an agency by its upstream id.
pub async fn upsert(pool: &SqlitePool, agency: &SourceAgency) -> Result<(), PipelineError> {
    let raw_data = serde_json::to_string(agency)
        .map_err(|e| PipelineError::Database(sqlx::Error::Encode(e.into())))?;
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO agencies (
            fr_agency_id, raw_name, name, short_name, slug, description, url, json_url,
            parent_id, raw_data, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fr_agency_id) DO UPDATE SET
            raw_name = excluded.raw_name,
            name = excluded.name,
            short_name = excluded.short_name,
            slug = excluded.slug,
            description = excluded.description,
            url = excluded.url,
            json_url = excluded.json_url,
            parent_id = excluded.parent_id,
            raw_data = excluded.raw_data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(agency.id)
    .bind(agency.raw_name.as_deref().unwrap_or(""))
    .bind(&agency.name)
    .bind(non_empty(&agency.short_name))
    .bind(&agency.slug)
    .bind(non_empty(&agency.description))
    .bind(non_empty(&agency.url))
    .bind(non_empty(&agency.json_url))
    .bind(agency.parent_id)
    .bind(&raw_data)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stored name of an agency, looked up by upstream id.
pub async fn name_by_upstream_id(
    pool: &SqlitePool,
    upstream_id: i64,
) -> Result<Option<String>, PipelineError> {
    let row = sqlx::query("SELECT name FROM agencies WHERE fr_agency_id = ?")
        .bind(upstream_id)
        .fetch_optional(pool)
        .await?;
    Ok(match row {
        Some(r) => Some(r.try_get("name")?),
        None => None,
    })
}

pub async fn count(pool: &SqlitePool) -> Result<i64, PipelineError> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agencies")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}
