//! # Notice Pipeline
//!
//! Batch ingestion of government notices from an upstream document registry.
//!
//! Each stage is an idempotent batch job over a single SQLite database. Raw
//! payloads are captured once, canonicalized into one record per upstream
//! document, optionally enriched with AI analysis, and projected into a
//! display-ready feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────────┐
//! │   Sources    │──▶│ raw_documents │──▶│ canonical_documents│
//! │ (registry)   │   │  (immutable)  │   │  (natural key)     │
//! └──────────────┘   └───────────────┘   └─────────┬──────────┘
//!                                                  │
//!                          ┌───────────────────────┤
//!                          ▼                       ▼
//!                    ┌──────────┐           ┌──────────────┐
//!                    │ Enricher │           │ feed_entries │
//!                    │  (AI)    │           │ (projection) │
//!                    └──────────┘           └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! notice-jobs --job migrate
//! notice-jobs --job pipeline --config ./config/notices.toml
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | `DocumentSource` trait and registry |
//! | [`source_fedreg`] | Federal Register source |
//! | [`raw_store`] | Raw payload capture |
//! | [`canonical_store`] | Canonical document persistence |
//! | [`feed_store`] | Feed entry persistence |
//! | [`agency_store`] | Agency directory persistence |
//! | [`canonicalize`] | Canonicalizer stage |
//! | [`analysis`] | AI analysis providers |
//! | [`enrich`] | Enricher stage |
//! | [`materialize`] | Materializer stage |
//! | [`jobs`] | Stage orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agency_store;
pub mod analysis;
pub mod canonical_store;
pub mod canonicalize;
pub mod config;
pub mod context;
pub mod db;
pub mod enrich;
pub mod error;
pub mod feed_store;
pub mod jobs;
pub mod materialize;
pub mod migrate;
pub mod models;
pub mod raw_store;
pub mod source_fedreg;
pub mod traits;
