//! Materializer: canonical documents → feed entries.
//!
//! Picks documents with no feed entry or a feed entry projected from an
//! older revision, and upserts their entries one transaction per batch.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::canonical_store;
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::feed_store;
use crate::models::StageReport;

/// Drain the materialization backlog. `processed` counts upserted entries.
pub async fn run_materialize(
    pool: &SqlitePool,
    batch_size: i64,
    ctx: &JobContext,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::new("materialize");

    info!(batch_size, "starting materialization");

    loop {
        ctx.checkpoint()?;

        let docs = canonical_store::list_needing_materialization(pool, batch_size).await?;
        if docs.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let mut written = 0u64;
        for doc in &docs {
            if feed_store::upsert_for_document(&mut *tx, doc).await? {
                written += 1;
            }
        }
        tx.commit().await?;

        debug!(batch = docs.len(), written, "materialized batch");
        report.processed += docs.len() as u64;
    }

    info!(upserted = report.processed, "materialization completed");
    Ok(report)
}
