//! Job wiring: builds both store connections, both retrievers and the two
//! engines from configuration, and renders run outcomes for the CLI.

use std::sync::Arc;

use anyhow::Result;

use topdup_core::connection::{Connection, StoreConnector};
use topdup_core::consolidate::{ConsolidationEngine, ConsolidationOutcome};
use topdup_core::retriever::Retriever;
use topdup_core::sync::{ReindexOutcome, SyncEngine, SyncOutcome};

use crate::config::Config;
use crate::db::PoolSettings;
use crate::sqlite_store::SqliteConnector;

/// The sync and consolidation engines sharing one remote connection.
pub struct Pipeline {
    sync: SyncEngine,
    consolidation: ConsolidationEngine,
}

impl Pipeline {
    /// Pipeline over the SQLite stores named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = PoolSettings::from_config(&config.stores);
        Self::with_connectors(
            config,
            Box::new(SqliteConnector::new(
                "local",
                config.stores.local_path.clone(),
                settings,
            )),
            Box::new(SqliteConnector::new(
                "remote",
                config.stores.remote_path.clone(),
                settings,
            )),
        )
    }

    pub fn with_connectors(
        config: &Config,
        local: Box<dyn StoreConnector>,
        remote: Box<dyn StoreConnector>,
    ) -> Result<Self> {
        let local = Arc::new(Connection::new(local));
        let remote = Arc::new(Connection::new(remote));

        let retriever = || {
            Retriever::tfidf(
                config.vectorizer.candidate_dims,
                config.vectorizer.retriever_dims,
                config.retrieval_params(),
            )
        };

        let sync = SyncEngine::new(
            config.sync_params(),
            local,
            remote.clone(),
            retriever()?,
            retriever()?,
        )?;
        let consolidation = ConsolidationEngine::new(config.consolidation_params(), remote);

        Ok(Self {
            sync,
            consolidation,
        })
    }

    pub async fn run_sync(&self) -> SyncOutcome {
        self.sync.run_sync().await
    }

    pub async fn run_consolidation(&self) -> ConsolidationOutcome {
        self.consolidation.run_consolidation().await
    }

    pub async fn run_full_remote_reindex(&self) -> ReindexOutcome {
        self.sync.run_full_remote_reindex().await
    }
}

pub fn summarize_sync(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Skipped => "sync skipped: previous run still in flight".to_string(),
        SyncOutcome::Aborted { reason } => format!("sync aborted: {}", reason),
        SyncOutcome::NoNewDocuments => "sync: no new documents".to_string(),
        SyncOutcome::Completed(r) => {
            let mut out = format!(
                "sync ({}) complete\n  synced:     {}\n  retrained:  {}\n  embedded:   {} local, {} remote\n  staged:     {}\n  applied:    {}",
                r.mode.as_str(),
                r.synced,
                r.retrained,
                r.local_embeddings.embedded,
                r.remote_embeddings.embedded,
                r.staged.len(),
                r.patches.processed,
            );
            let skipped = r.retrieval.skipped.len() + r.patches.skipped.len();
            if skipped > 0 {
                out.push_str(&format!("\n  skipped:    {}", skipped));
            }
            out
        }
    }
}

pub fn summarize_consolidation(outcome: &ConsolidationOutcome) -> String {
    match outcome {
        ConsolidationOutcome::Skipped => {
            "consolidation skipped: previous run still in flight".to_string()
        }
        ConsolidationOutcome::Aborted { reason } => format!("consolidation aborted: {}", reason),
        ConsolidationOutcome::NoPairs => "consolidation: no similar pairs in window".to_string(),
        ConsolidationOutcome::NothingNew { report } => format!(
            "consolidation: no new pairs ({} seen, {} skipped)",
            report.processed,
            report.skipped.len()
        ),
        ConsolidationOutcome::Completed { inserted, report } => format!(
            "consolidation complete\n  inserted:   {}\n  skipped:    {}",
            inserted,
            report.skipped.len()
        ),
    }
}

pub fn summarize_reindex(outcome: &ReindexOutcome) -> String {
    match outcome {
        ReindexOutcome::Skipped => "reindex skipped: previous run still in flight".to_string(),
        ReindexOutcome::Aborted { reason } => format!("reindex aborted: {}", reason),
        ReindexOutcome::Completed(r) => format!(
            "full remote reindex complete\n  embedded:   {}\n  cleared:    {} local documents",
            r.remote_embeddings.embedded, r.cleared
        ),
    }
}
