//! # TopDup
//!
//! Near-duplicate detection for news articles.
//!
//! TopDup keeps a small local replica of recently published articles in
//! sync with the remote article store, scores every new article against
//! both corpora with a two-stage (candidate, then rerank) retriever, writes
//! the best matches back as document metadata, and consolidates those
//! annotations into a deduplicated `similar_docs` relation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  new ids   ┌──────────────┐
//! │ Remote store │──────────▶│ Local store  │
//! │   (SQLite)   │           │   (SQLite)   │
//! └──────┬───────┘           └──────┬───────┘
//!        │ remote retriever         │ local retriever
//!        ▼                          ▼
//!   ┌─────────────────────────────────────┐
//!   │ merge by rank ─▶ metadata patches   │──▶ remote
//!   └─────────────────────────────────────┘
//!        │
//!        ▼
//!   consolidation ─▶ similar_docs (remote)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! topdup init          # create both stores
//! topdup sync          # one sync run
//! topdup consolidate   # one consolidation run
//! topdup run           # schedule all jobs until Ctrl-C
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `DocumentStore` and connector |
//! | [`jobs`] | Engine wiring and run summaries |
//! | [`scheduler`] | Periodic job runner |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod db;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod scheduler;
pub mod sqlite_store;
