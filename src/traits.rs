//! Pluggable document sources.
//!
//! Every upstream registry is a [`DocumentSource`]. The orchestrator only
//! ever talks to a [`SourceRegistry`], so adding a source means implementing
//! the trait and registering an instance.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             SourceRegistry               │
//! │  ┌──────────────────┐ ┌───────────────┐  │
//! │  │ Federal Register │ │ Custom (Rust) │  │
//! │  └──────────────────┘ └───────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!   scrape → raw_documents → canonicalize (parse_payload)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use notice_pipeline::traits::SourceRegistry;
//!
//! let mut sources = SourceRegistry::new();
//! // sources.register(Box::new(MySource::new()));
//! assert!(sources.is_empty());
//! ```

use async_trait::async_trait;

use crate::config::Config;
use crate::context::JobContext;
use crate::error::PipelineError;
use crate::models::{FetchedDocument, ScrapedDocument, SourceAgency};

/// An upstream system that publishes documents.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use notice_pipeline::context::JobContext;
/// use notice_pipeline::error::PipelineError;
/// use notice_pipeline::models::{FetchedDocument, ScrapedDocument};
/// use notice_pipeline::traits::DocumentSource;
///
/// pub struct EmptySource;
///
/// #[async_trait]
/// impl DocumentSource for EmptySource {
///     fn source_key(&self) -> &str { "empty" }
///     fn description(&self) -> &str { "Never publishes anything" }
///
///     async fn fetch(
///         &self,
///         _window_days: u32,
///         _ctx: &JobContext,
///     ) -> Result<Vec<FetchedDocument>, PipelineError> {
///         Ok(vec![])
///     }
///
///     fn parse_payload(&self, _raw: &[u8]) -> Result<ScrapedDocument, String> {
///         Err("no payloads".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Stable identifier stored as `source_key` on every row from this source.
    fn source_key(&self) -> &str;

    /// One-line description for logs.
    fn description(&self) -> &str;

    /// Fetch every document published in the last `window_days` days.
    ///
    /// Any page failure fails the whole call; nothing from a partial fetch
    /// is returned. Implementations should observe `ctx` between pages.
    async fn fetch(
        &self,
        window_days: u32,
        ctx: &JobContext,
    ) -> Result<Vec<FetchedDocument>, PipelineError>;

    /// Parse a payload previously returned by [`fetch`](DocumentSource::fetch).
    ///
    /// Returns a human-readable reason on failure.
    fn parse_payload(&self, raw: &[u8]) -> Result<ScrapedDocument, String>;

    /// The source's agency directory. Sources without one return nothing.
    async fn fetch_agencies(&self, _ctx: &JobContext) -> Result<Vec<SourceAgency>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Ordered set of registered sources.
pub struct SourceRegistry {
    sources: Vec<Box<dyn DocumentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Registry holding the built-in Federal Register source.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        use crate::source_fedreg::FederalRegisterSource;

        let mut registry = Self::new();
        registry.register(Box::new(FederalRegisterSource::new(&config.registry)?));
        Ok(registry)
    }

    pub fn register(&mut self, source: Box<dyn DocumentSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Box<dyn DocumentSource>] {
        &self.sources
    }

    /// Find the source that owns `source_key`.
    pub fn find(&self, source_key: &str) -> Option<&dyn DocumentSource> {
        self.sources
            .iter()
            .find(|s| s.source_key() == source_key)
            .map(|s| s.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
