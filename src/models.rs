//! Core data models that flow through the ingestion pipeline.
//!
//! ```text
//! FetchedDocument ─▶ RawDocument ─▶ CanonicalDocument ─▶ FeedEntry
//!   (source)          (raw store)     (canonical store)    (feed store)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source-agnostic shape of one upstream document, as parsed by its source.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedDocument {
    pub external_id: String,
    pub title: String,
    pub document_type: Option<String>,
    pub abstract_text: Option<String>,
    pub excerpts: Option<String>,
    pub html_url: String,
    pub publication_date: String,
    pub pdf_url: Option<String>,
    pub public_inspection_pdf_url: Option<String>,
    pub agency_names: Vec<String>,
}

/// One fetched document plus the upstream payload it was parsed from.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub document: ScrapedDocument,
    pub raw_payload: Vec<u8>,
}

/// An upstream agency record, as listed by a source's agency directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAgency {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub raw_name: Option<String>,
    #[serde(default)]
    pub json_url: Option<String>,
}

/// Immutable capture of an upstream payload.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub id: i64,
    pub source_key: String,
    pub external_id: String,
    pub raw_payload: Vec<u8>,
    pub payload_sha256: String,
    pub fetched_at: DateTime<Utc>,
    pub canonical_document_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn is_linked(&self) -> bool {
        self.canonical_document_id.is_some()
    }
}

/// Impact classification attached by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScore {
    Low,
    Medium,
    High,
}

impl ImpactScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse an analysis-service value, defaulting to medium when unrecognized.
    pub fn parse_lenient(value: &str) -> Self {
        value.trim().to_ascii_lowercase().parse().unwrap_or(Self::Medium)
    }
}

impl FromStr for ImpactScore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown impact score '{}'", other)),
        }
    }
}

impl fmt::Display for ImpactScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a canonical document stands with respect to AI enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Complete,
    Degraded,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Degraded => "degraded",
        }
    }

    pub fn from_db(value: Option<&str>) -> Option<Self> {
        match value {
            Some("complete") => Some(Self::Complete),
            Some("degraded") => Some(Self::Degraded),
            _ => None,
        }
    }
}

/// The deduplicated, editorially-owned record.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDocument {
    pub id: i64,
    pub source_key: String,
    pub external_id: String,
    pub fetched_at: DateTime<Utc>,
    pub title: String,
    pub agency: Option<String>,
    pub summary: String,
    pub key_points: Vec<String>,
    pub impact_score: Option<ImpactScore>,
    pub political_score: Option<i64>,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub document_type: Option<String>,
    pub pdf_url: Option<String>,
    pub analysis_status: Option<AnalysisStatus>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field set written by the canonicalizer (everything a source can know).
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDraft {
    pub source_key: String,
    pub external_id: String,
    pub fetched_at: DateTime<Utc>,
    pub title: String,
    pub agency: Option<String>,
    pub summary: String,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub document_type: Option<String>,
    pub pdf_url: Option<String>,
}

/// AI-derived fields written back onto a canonical document.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentUpdate {
    pub summary: String,
    pub key_points: Vec<String>,
    pub impact_score: Option<ImpactScore>,
    pub political_score: Option<i64>,
    pub status: AnalysisStatus,
}

/// Denormalized, read-optimized projection of a canonical document.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: i64,
    pub canonical_document_id: i64,
    pub title: String,
    pub short_text: String,
    pub key_points: Vec<String>,
    pub political_score: Option<i64>,
    pub impact_score: Option<ImpactScore>,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub source_revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counters reported by one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    /// True when the stage counted work without writing it.
    pub dry_run: bool,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Default::default()
        }
    }

    /// One-line job summary printed by the CLI.
    pub fn summary_line(&self) -> String {
        match (self.stage, self.dry_run) {
            ("sync-agencies", _) => format!(
                "sync-agencies completed: synced={} failed={}",
                self.processed, self.errors
            ),
            ("scrape", _) => format!(
                "scrape completed: inserted={} skipped={}",
                self.processed, self.skipped
            ),
            ("canonicalize", _) => format!(
                "canonicalize completed: linked={} quarantined={}",
                self.processed, self.errors
            ),
            ("enrich", true) => format!(
                "enrich completed (dry-run): would_enrich={}",
                self.processed
            ),
            ("enrich", false) => format!(
                "enrich completed: enriched={} degraded={}",
                self.processed, self.errors
            ),
            ("materialize", _) => format!("materialize completed: upserted={}", self.processed),
            (stage, _) => format!(
                "{} completed: processed={} skipped={} errors={}",
                stage, self.processed, self.skipped, self.errors
            ),
        }
    }
}

/// Parse the registry's `YYYY-MM-DD` publication date as midnight UTC.
pub fn parse_publication_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Convert a stored unix timestamp back to UTC.
pub fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_publication_date() {
        let dt = parse_publication_date("2025-01-10").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2025, 1, 10));
        assert_eq!(dt.timestamp() % 86_400, 0);
    }

    #[test]
    fn test_parse_publication_date_rejects_other_formats() {
        assert!(parse_publication_date("01/10/2025").is_none());
        assert!(parse_publication_date("2025-13-01").is_none());
        assert!(parse_publication_date("").is_none());
    }

    #[test]
    fn test_impact_lenient_parse_defaults_to_medium() {
        assert_eq!(ImpactScore::parse_lenient("HIGH"), ImpactScore::High);
        assert_eq!(ImpactScore::parse_lenient(" low "), ImpactScore::Low);
        assert_eq!(ImpactScore::parse_lenient("severe"), ImpactScore::Medium);
    }

    #[test]
    fn test_summary_lines() {
        let mut report = StageReport::new("scrape");
        report.processed = 12;
        report.skipped = 3;
        assert_eq!(report.summary_line(), "scrape completed: inserted=12 skipped=3");

        let mut report = StageReport::new("enrich");
        report.processed = 4;
        report.dry_run = true;
        assert_eq!(
            report.summary_line(),
            "enrich completed (dry-run): would_enrich=4"
        );
    }

    #[test]
    fn test_from_unix_roundtrip() {
        let dt = parse_publication_date("2024-06-30").unwrap();
        assert_eq!(from_unix(dt.timestamp()), dt);
    }
}
