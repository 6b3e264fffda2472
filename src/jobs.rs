//! Pipeline orchestration.
//!
//! [`Jobs`] exposes every stage as an independently invokable operation and
//! a composite [`Jobs::pipeline`] that runs them in a fixed order:
//!
//! ```text
//! sync-agencies → scrape → canonicalize → enrich → materialize
//! ```
//!
//! Stages run sequentially and the pipeline stops at the first stage that
//! fails. Every stage error comes back wrapped in
//! [`PipelineError::Stage`] naming the stage.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::agency_store;
use crate::analysis::{create_analyzer, Analyzer};
use crate::canonicalize::run_canonicalize;
use crate::config::Config;
use crate::context::JobContext;
use crate::db;
use crate::enrich::run_enrich;
use crate::error::PipelineError;
use crate::materialize::run_materialize;
use crate::migrate;
use crate::models::StageReport;
use crate::raw_store;
use crate::traits::SourceRegistry;

/// Reports from every stage of one pipeline run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

pub struct Jobs {
    pool: SqlitePool,
    config: Config,
    sources: SourceRegistry,
    analyzer: Option<Box<dyn Analyzer>>,
}

impl Jobs {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        sources: SourceRegistry,
        analyzer: Option<Box<dyn Analyzer>>,
    ) -> Self {
        Self {
            pool,
            config,
            sources,
            analyzer,
        }
    }

    /// Connect to the configured database and build the built-in sources
    /// and the configured analyzer.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let sources = SourceRegistry::from_config(config)?;
        let analyzer = create_analyzer(&config.analysis)?;
        let pool = db::connect(config).await?;
        Ok(Self::new(pool, config.clone(), sources, analyzer))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub async fn migrate(&self) -> Result<(), PipelineError> {
        migrate::apply_schema(&self.pool)
            .await
            .map_err(|e| e.in_stage("migrate"))
    }

    /// Upsert every source's agency directory. A single agency that fails
    /// to persist is logged and counted, not fatal.
    pub async fn sync_agencies(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        self.sync_agencies_inner(ctx)
            .await
            .map_err(|e| e.in_stage("sync-agencies"))
    }

    async fn sync_agencies_inner(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new("sync-agencies");
        info!("syncing agencies");

        for source in self.sources.sources() {
            ctx.checkpoint()?;
            let agencies = source.fetch_agencies(ctx).await?;

            for agency in &agencies {
                match agency_store::upsert(&self.pool, agency).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        warn!(source = source.source_key(), agency = %agency.name, error = %e, "failed to upsert agency");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            synced = report.processed,
            failed = report.errors,
            "agency sync completed"
        );
        Ok(report)
    }

    /// Fetch from every registered source and capture raw payloads.
    ///
    /// The fetch completes before any transaction opens; each source's
    /// documents are then inserted in one transaction. Existing natural
    /// keys are counted as skipped.
    pub async fn scrape_raw(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        self.scrape_raw_inner(ctx)
            .await
            .map_err(|e| e.in_stage("scrape"))
    }

    async fn scrape_raw_inner(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new("scrape");
        let window = self.config.registry.days_lookback;
        info!(window_days = window, "starting raw ingestion");

        for source in self.sources.sources() {
            ctx.checkpoint()?;
            info!(
                source = source.source_key(),
                description = source.description(),
                "fetching source"
            );

            let fetched = source.fetch(window, ctx).await?;
            let fetched_at = Utc::now();

            let mut tx = self.pool.begin().await?;
            for item in &fetched {
                let inserted = raw_store::insert_if_absent(
                    &mut *tx,
                    source.source_key(),
                    &item.document.external_id,
                    &item.raw_payload,
                    fetched_at,
                )
                .await?;
                if inserted {
                    report.processed += 1;
                } else {
                    report.skipped += 1;
                }
            }
            tx.commit().await?;
        }

        info!(
            inserted = report.processed,
            skipped = report.skipped,
            "raw ingestion completed"
        );
        Ok(report)
    }

    pub async fn canonicalize(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        run_canonicalize(
            &self.pool,
            &self.sources,
            self.config.pipeline.canonicalize_batch_size,
            self.config.pipeline.on_parse_error,
            ctx,
        )
        .await
        .map_err(|e| e.in_stage("canonicalize"))
    }

    pub async fn enrich(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        run_enrich(
            &self.pool,
            self.analyzer.as_deref(),
            self.config.pipeline.enrich_batch_size,
            ctx,
        )
        .await
        .map_err(|e| e.in_stage("enrich"))
    }

    pub async fn materialize(&self, ctx: &JobContext) -> Result<StageReport, PipelineError> {
        run_materialize(&self.pool, self.config.pipeline.materialize_batch_size, ctx)
            .await
            .map_err(|e| e.in_stage("materialize"))
    }

    /// Run every stage once, in order, stopping at the first failure.
    pub async fn pipeline(&self, ctx: &JobContext) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();

        report.stages.push(self.sync_agencies(ctx).await?);
        report.stages.push(self.scrape_raw(ctx).await?);
        report.stages.push(self.canonicalize(ctx).await?);
        report.stages.push(self.enrich(ctx).await?);
        report.stages.push(self.materialize(ctx).await?);

        info!("pipeline completed");
        Ok(report)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
