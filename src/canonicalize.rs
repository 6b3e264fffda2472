//! Canonicalizer: raw payloads → canonical documents.
//!
//! Each unlinked raw row is parsed by the source that produced it, upserted
//! into `canonical_documents` by natural key and linked back, all in one
//! transaction per row. If the upsert changed a document that already has a
//! feed entry, the entry is re-projected inside the same transaction.
//!
//! The run drains the backlog with an id cursor, so rows left unlinked by
//! the quarantine policy are passed over instead of re-read forever.

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::canonical_store;
use crate::config::ParseFailurePolicy;
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::feed_store;
use crate::models::{parse_publication_date, CanonicalDraft, RawDocument, ScrapedDocument, StageReport};
use crate::raw_store;
use crate::traits::SourceRegistry;

/// Summary stored until enrichment replaces it.
pub const PENDING_SUMMARY: &str = "Pending summary.";

/// Placeholder summaries are cut at this many characters.
pub const SUMMARY_MAX_CHARS: usize = 1000;

/// Excerpts win over the abstract; the result is cut at exactly
/// [`SUMMARY_MAX_CHARS`] characters. Falls back to [`PENDING_SUMMARY`].
pub fn derive_placeholder_summary(doc: &ScrapedDocument) -> String {
    let text = match (&doc.excerpts, &doc.abstract_text) {
        (Some(excerpts), _) if !excerpts.is_empty() => excerpts.as_str(),
        (_, Some(abstract_text)) => abstract_text.as_str(),
        _ => "",
    };

    if text.trim().is_empty() {
        return PENDING_SUMMARY.to_string();
    }

    match text.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Map a parsed upstream document onto the canonical field set.
pub fn build_draft(raw: &RawDocument, doc: &ScrapedDocument) -> Result<CanonicalDraft, String> {
    let published_at = parse_publication_date(&doc.publication_date).ok_or_else(|| {
        format!(
            "invalid publication_date '{}' (expected YYYY-MM-DD)",
            doc.publication_date
        )
    })?;

    let agency = doc
        .agency_names
        .iter()
        .find(|name| !name.trim().is_empty())
        .cloned();

    Ok(CanonicalDraft {
        source_key: raw.source_key.clone(),
        external_id: raw.external_id.clone(),
        fetched_at: raw.fetched_at,
        title: doc.title.clone(),
        agency,
        summary: derive_placeholder_summary(doc),
        source_url: doc.html_url.clone(),
        published_at,
        document_type: doc.document_type.clone(),
        pdf_url: doc.pdf_url.clone(),
    })
}

/// Canonicalize a single raw row in its own transaction.
///
/// Returns the canonical document id the row is now linked to.
pub async fn canonicalize_one(
    pool: &SqlitePool,
    sources: &SourceRegistry,
    raw: &RawDocument,
) -> Result<i64, PipelineError> {
    let source = sources.find(&raw.source_key).ok_or_else(|| PipelineError::Parse {
        raw_id: raw.id,
        reason: format!("no registered source for '{}'", raw.source_key),
    })?;

    let draft = source
        .parse_payload(&raw.raw_payload)
        .and_then(|doc| build_draft(raw, &doc))
        .map_err(|reason| PipelineError::Parse {
            raw_id: raw.id,
            reason,
        })?;

    let mut tx = pool.begin().await?;

    let outcome = canonical_store::upsert_canonical(&mut *tx, &draft).await?;
    raw_store::link_to_canonical(&mut *tx, raw.id, outcome.id).await?;

    if !outcome.created
        && outcome.changed
        && feed_store::exists_for_document(&mut *tx, outcome.id).await?
    {
        if let Some(doc) = canonical_store::get_by_id(&mut *tx, outcome.id).await? {
            feed_store::upsert_for_document(&mut *tx, &doc).await?;
            debug!(document_id = outcome.id, "re-projected feed entry");
        }
    }

    tx.commit().await?;

    Ok(outcome.id)
}

/// Drain every unlinked raw row.
///
/// `processed` counts linked rows and `errors` counts quarantined ones.
pub async fn run_canonicalize(
    pool: &SqlitePool,
    sources: &SourceRegistry,
    batch_size: i64,
    policy: ParseFailurePolicy,
    ctx: &JobContext,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::new("canonicalize");
    let mut cursor = 0i64;

    info!(batch_size, ?policy, "starting canonicalization");

    loop {
        ctx.checkpoint()?;

        let rows = raw_store::list_unlinked(pool, cursor, batch_size).await?;
        if rows.is_empty() {
            break;
        }

        for raw in &rows {
            ctx.checkpoint()?;
            cursor = raw.id;

            match canonicalize_one(pool, sources, raw).await {
                Ok(_) => report.processed += 1,
                Err(e) if e.is_parse() && policy == ParseFailurePolicy::Quarantine => {
                    warn!(raw_id = raw.id, external_id = %raw.external_id, error = %e, "quarantined raw document");
                    report.errors += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(
        linked = report.processed,
        quarantined = report.errors,
        "canonicalization completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn scraped(abstract_text: Option<&str>, excerpts: Option<&str>) -> ScrapedDocument {
        ScrapedDocument {
            external_id: "2025-0001".into(),
            title: "Title".into(),
            document_type: Some("Notice".into()),
            abstract_text: abstract_text.map(String::from),
            excerpts: excerpts.map(String::from),
            html_url: "https://example.gov/d/1".into(),
            publication_date: "2025-01-10".into(),
            pdf_url: None,
            public_inspection_pdf_url: None,
            agency_names: vec![],
        }
    }

    fn raw_row() -> RawDocument {
        RawDocument {
            id: 1,
            source_key: "federal_register".into(),
            external_id: "2025-0001".into(),
            raw_payload: b"{}".to_vec(),
            payload_sha256: String::new(),
            fetched_at: Utc.with_ymd_and_hms(2025, 1, 11, 8, 0, 0).unwrap(),
            canonical_document_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 11, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_summary_truncated_to_exact_limit() {
        let long = "a".repeat(1500);
        let summary = derive_placeholder_summary(&scraped(None, Some(&long)));
        assert_eq!(summary.chars().count(), 1000);
    }

    #[test]
    fn test_summary_truncation_counts_characters() {
        let long = "é".repeat(1200);
        let summary = derive_placeholder_summary(&scraped(Some(&long), None));
        assert_eq!(summary.chars().count(), 1000);
        assert_eq!(summary.len(), 2000);
    }

    #[test]
    fn test_excerpts_preferred_over_abstract() {
        assert_eq!(derive_placeholder_summary(&scraped(Some("X"), Some("Y"))), "Y");
    }

    #[test]
    fn test_empty_excerpts_fall_back_to_abstract() {
        assert_eq!(derive_placeholder_summary(&scraped(Some("X"), Some(""))), "X");
    }

    #[test]
    fn test_missing_text_uses_pending_summary() {
        assert_eq!(derive_placeholder_summary(&scraped(None, None)), PENDING_SUMMARY);
        assert_eq!(
            derive_placeholder_summary(&scraped(Some("  "), None)),
            PENDING_SUMMARY
        );
    }

    #[test]
    fn test_draft_uses_first_named_agency() {
        let mut doc = scraped(None, Some("short text"));
        doc.agency_names = vec!["".into(), "Treasury Department".into(), "IRS".into()];
        let draft = build_draft(&raw_row(), &doc).unwrap();
        assert_eq!(draft.agency.as_deref(), Some("Treasury Department"));
        assert_eq!(draft.summary, "short text");
        assert_eq!(
            draft.published_at,
            Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(draft.fetched_at, raw_row().fetched_at);
    }

    #[test]
    fn test_draft_rejects_bad_date() {
        let mut doc = scraped(None, None);
        doc.publication_date = "January 10, 2025".into();
        let err = build_draft(&raw_row(), &doc).unwrap_err();
        assert!(err.contains("publication_date"));
    }
}
