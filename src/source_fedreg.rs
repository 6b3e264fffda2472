//! Federal Register source.
//!
//! Pages through `GET {base}/documents` filtered by publication date and
//! keeps every result object byte-for-byte as the raw payload. The agency
//! directory comes from `GET {base}/agencies`, a flat JSON list.

use async_trait::async_trait;
use chrono::{Days, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::models::{FetchedDocument, ScrapedDocument, SourceAgency};
use crate::traits::DocumentSource;

pub const SOURCE_KEY: &str = "federal_register";

const DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_ERROR_BODY: usize = 512;

/// Result objects are kept as the exact text upstream sent.
#[derive(Debug, Deserialize)]
struct DocumentsPage {
    #[serde(default)]
    results: Vec<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    document_number: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "type", default)]
    document_type: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    public_inspection_pdf_url: Option<String>,
    #[serde(default)]
    excerpts: Option<String>,
    #[serde(default)]
    agencies: Option<Vec<AgencyRef>>,
}

#[derive(Debug, Deserialize)]
struct AgencyRef {
    #[serde(default)]
    name: Option<String>,
}

/// Agency record as served by `/agencies`; upstream sends nulls freely.
#[derive(Debug, Deserialize)]
struct RegistryAgency {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    raw_name: Option<String>,
    #[serde(default)]
    json_url: Option<String>,
}

pub struct FederalRegisterSource {
    client: reqwest::Client,
    base_url: String,
    per_page: u32,
    max_pages: u32,
    page_delay: Duration,
}

impl FederalRegisterSource {
    pub fn new(config: &RegistryConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("notice-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            max_pages: config.max_pages,
            page_delay: Duration::from_millis(config.page_delay_ms),
        })
    }

    async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, PipelineError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl DocumentSource for FederalRegisterSource {
    fn source_key(&self) -> &str {
        SOURCE_KEY
    }

    fn description(&self) -> &str {
        "Federal Register documents API"
    }

    async fn fetch(
        &self,
        window_days: u32,
        ctx: &JobContext,
    ) -> Result<Vec<FetchedDocument>, PipelineError> {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(u64::from(window_days)))
            .unwrap_or(end);
        let gte = start.format(DATE_FORMAT).to_string();
        let lte = end.format(DATE_FORMAT).to_string();
        let url = format!("{}/documents", self.base_url);

        let mut fetched = Vec::new();

        for page in 1..=self.max_pages {
            ctx.checkpoint()?;

            let query = [
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
                ("filter[publication_date][gte]", gte.clone()),
                ("filter[publication_date][lte]", lte.clone()),
            ];
            let body = self.get_bytes(&url, &query).await?;
            let parsed: DocumentsPage = serde_json::from_slice(&body)?;
            let count = parsed.results.len();

            debug!(page, count, "fetched registry page");

            for value in parsed.results {
                let raw_payload = value.get().as_bytes().to_vec();
                let document = self.parse_payload(&raw_payload).map_err(|reason| {
                    PipelineError::Transport(format!("malformed registry document: {}", reason))
                })?;
                fetched.push(FetchedDocument {
                    document,
                    raw_payload,
                });
            }

            if count < self.per_page as usize {
                break;
            }
            if page < self.max_pages {
                ctx.pause(self.page_delay).await?;
            }
        }

        info!(
            source = SOURCE_KEY,
            from = %gte,
            to = %lte,
            documents = fetched.len(),
            "registry fetch complete"
        );
        Ok(fetched)
    }

    fn parse_payload(&self, raw: &[u8]) -> Result<ScrapedDocument, String> {
        parse_registry_document(raw)
    }

    async fn fetch_agencies(&self, ctx: &JobContext) -> Result<Vec<SourceAgency>, PipelineError> {
        ctx.checkpoint()?;

        let url = format!("{}/agencies", self.base_url);
        let body = self.get_bytes(&url, &[]).await?;
        let listed: Vec<RegistryAgency> = serde_json::from_slice(&body)?;

        let mut agencies = Vec::with_capacity(listed.len());
        for agency in listed {
            let Some(id) = agency.id else {
                warn!(name = ?agency.name, "skipping agency without id");
                continue;
            };
            agencies.push(SourceAgency {
                id,
                name: agency.name.unwrap_or_default(),
                short_name: agency.short_name,
                slug: agency.slug.unwrap_or_default(),
                url: agency.url,
                parent_id: agency.parent_id,
                description: agency.description,
                raw_name: agency.raw_name,
                json_url: agency.json_url,
            });
        }
        Ok(agencies)
    }
}

/// Decode one registry result object into the source-agnostic shape.
pub fn parse_registry_document(raw: &[u8]) -> Result<ScrapedDocument, String> {
    let doc: RegistryDocument =
        serde_json::from_slice(raw).map_err(|e| format!("invalid payload JSON: {}", e))?;

    let external_id = doc
        .document_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "missing document_number".to_string())?;

    Ok(ScrapedDocument {
        external_id,
        title: doc.title.unwrap_or_default(),
        document_type: doc.document_type.filter(|t| !t.is_empty()),
        abstract_text: doc.abstract_text,
        excerpts: doc.excerpts,
        html_url: doc.html_url.unwrap_or_default(),
        publication_date: doc.publication_date.unwrap_or_default(),
        pdf_url: doc.pdf_url.filter(|u| !u.is_empty()),
        public_inspection_pdf_url: doc.public_inspection_pdf_url.filter(|u| !u.is_empty()),
        agency_names: doc
            .agencies
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.name)
            .collect(),
    })
}
