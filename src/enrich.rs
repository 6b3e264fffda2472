//! Enricher: attaches AI analysis to canonical documents.
//!
//! Without an analyzer the stage is a dry run: it scans one batch and counts
//! the documents that would be enriched. With one, it drains the backlog:
//! every document in a batch is analyzed first, then all results are
//! written in a single transaction. A failed analysis degrades that one
//! document to a fallback summary instead of failing the batch; an
//! interrupted one (cancel or deadline) stops the stage before the batch
//! is written.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::analysis::{fallback_summary, Analysis, AnalysisRequest, Analyzer};
use crate::canonical_store;
use crate::canonicalize::PENDING_SUMMARY;
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::models::{AnalysisStatus, CanonicalDocument, EnrichmentUpdate, StageReport};

/// True when any AI-derived field is still missing.
pub fn needs_enrichment(doc: &CanonicalDocument) -> bool {
    doc.impact_score.is_none() || doc.political_score.is_none() || doc.key_points.is_empty()
}

pub fn analysis_request(doc: &CanonicalDocument) -> AnalysisRequest {
    let text = if doc.summary == PENDING_SUMMARY {
        String::new()
    } else {
        doc.summary.clone()
    };
    AnalysisRequest {
        title: doc.title.clone(),
        agency: doc.agency.clone().unwrap_or_default(),
        text,
    }
}

fn complete_update(analysis: Analysis) -> EnrichmentUpdate {
    EnrichmentUpdate {
        summary: analysis.summary,
        key_points: analysis.key_points,
        impact_score: Some(analysis.impact_score),
        political_score: Some(analysis.political_score),
        status: AnalysisStatus::Complete,
    }
}

/// Update written when the analyzer fails for a document.
pub fn degraded_update(doc: &CanonicalDocument) -> EnrichmentUpdate {
    EnrichmentUpdate {
        summary: fallback_summary(&doc.summary),
        key_points: Vec::new(),
        impact_score: None,
        political_score: None,
        status: AnalysisStatus::Degraded,
    }
}

/// Run the enrichment stage.
///
/// Dry run (`analyzer = None`): `processed` is the would-enrich count.
/// Write-back: `processed` counts completed analyses, `errors` degraded ones.
pub async fn run_enrich(
    pool: &SqlitePool,
    analyzer: Option<&dyn Analyzer>,
    batch_size: i64,
    ctx: &JobContext,
) -> Result<StageReport, PipelineError> {
    match analyzer {
        None => dry_run(pool, batch_size, ctx).await,
        Some(analyzer) => write_back(pool, analyzer, batch_size, ctx).await,
    }
}

async fn dry_run(
    pool: &SqlitePool,
    batch_size: i64,
    ctx: &JobContext,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::new("enrich");
    report.dry_run = true;

    info!(batch_size, "starting enrichment (dry-run; no writes)");
    ctx.checkpoint()?;

    // Nothing is written, so a second batch would return the same rows.
    let docs = canonical_store::list_needing_enrichment(pool, batch_size, false).await?;
    report.processed = docs.iter().filter(|d| needs_enrichment(d)).count() as u64;

    info!(would_enrich = report.processed, "enrichment dry-run completed");
    Ok(report)
}

async fn write_back(
    pool: &SqlitePool,
    analyzer: &dyn Analyzer,
    batch_size: i64,
    ctx: &JobContext,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::new("enrich");

    info!(batch_size, provider = analyzer.name(), "starting enrichment");

    loop {
        ctx.checkpoint()?;

        let docs = canonical_store::list_needing_enrichment(pool, batch_size, true).await?;
        if docs.is_empty() {
            break;
        }

        let mut updates = Vec::with_capacity(docs.len());
        for doc in &docs {
            ctx.checkpoint()?;
            match analyzer.analyze(&analysis_request(doc), ctx).await {
                Ok(analysis) => {
                    updates.push((doc.id, complete_update(analysis)));
                    report.processed += 1;
                }
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    warn!(document_id = doc.id, error = %e, "analysis failed; storing fallback");
                    updates.push((doc.id, degraded_update(doc)));
                    report.errors += 1;
                }
            }
        }

        let mut tx = pool.begin().await?;
        for (id, update) in &updates {
            canonical_store::apply_enrichment(&mut *tx, *id, update).await?;
        }
        tx.commit().await?;
    }

    info!(
        enriched = report.processed,
        degraded = report.errors,
        "enrichment completed"
    );
    Ok(report)
}
