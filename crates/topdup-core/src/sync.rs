//! Local replica sync and similarity annotation.
//!
//! The [`SyncEngine`] pulls recently changed documents from the remote
//! store into the local replica, keeps both retrievers trained and indexed,
//! retrieves near-duplicates for the new documents against both corpora and
//! writes the better of the two results back to the remote store as
//! rank-encoded metadata.
//!
//! # Modes
//!
//! | Mode | Trigger | Lookback | Remote index |
//! |------|---------|----------|--------------|
//! | Full | local index artifact absent | wide (days) | rebuilt |
//! | Incremental | local index artifact present | short (cadence) | extended |
//!
//! In full mode the remote index was just rebuilt from the same documents,
//! so remote retrieval is skipped and the local results stand in for it.
//!
//! Errors never leave a run: connectivity and store failures abort it with
//! [`SyncOutcome::Aborted`] and the next scheduled run starts over.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::guard::JobGuard;
use crate::models::{Document, MetaPatch};
use crate::report::BatchReport;
use crate::retriever::{EmbeddingUpdate, Retriever};
use crate::similarity::merge_by_rank;

/// Sync tuning and artifact locations, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SyncParams {
    /// Scores must be strictly greater than this to be recorded.
    pub threshold: f32,
    pub incremental_lookback: Duration,
    pub full_lookback: Duration,
    /// Batch size for remote fetches and metadata patch writes.
    pub chunk_size: usize,
    pub candidate_vectorizer_path: PathBuf,
    pub retriever_vectorizer_path: PathBuf,
    pub local_index_path: PathBuf,
    pub remote_index_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

/// Summary of a completed sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Documents copied from remote to local.
    pub synced: usize,
    /// Whether the vectorizers were refitted during this run.
    pub retrained: bool,
    pub local_embeddings: EmbeddingUpdate,
    pub remote_embeddings: EmbeddingUpdate,
    /// Per-document retrieval failures, local and remote.
    pub retrieval: BatchReport,
    /// Metadata patches staged for the remote store.
    pub staged: Vec<MetaPatch>,
    /// Outcome of applying the staged patches.
    pub patches: BatchReport,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// A previous sync was still running.
    Skipped,
    /// The run stopped early; the next invocation retries.
    Aborted { reason: String },
    /// No remote document in the lookback window is missing locally.
    NoNewDocuments,
    Completed(SyncReport),
}

/// Summary of a full remote reindex.
#[derive(Debug, Clone)]
pub struct ReindexReport {
    pub remote_embeddings: EmbeddingUpdate,
    /// Local documents dropped after the rebuild.
    pub cleared: usize,
}

#[derive(Debug, Clone)]
pub enum ReindexOutcome {
    Skipped,
    Aborted { reason: String },
    Completed(ReindexReport),
}

pub struct SyncEngine {
    params: SyncParams,
    local: Arc<Connection>,
    remote: Arc<Connection>,
    // Always locked local first, then remote.
    local_retriever: Mutex<Retriever>,
    remote_retriever: Mutex<Retriever>,
    sync_guard: JobGuard,
    reindex_guard: JobGuard,
}

impl SyncEngine {
    pub fn new(
        params: SyncParams,
        local: Arc<Connection>,
        remote: Arc<Connection>,
        local_retriever: Retriever,
        remote_retriever: Retriever,
    ) -> Result<Self> {
        if params.chunk_size == 0 {
            bail!("chunk_size must be >= 1");
        }
        if local_retriever.params().top_k != remote_retriever.params().top_k {
            bail!("local and remote retrievers must keep the same number of matches");
        }
        Ok(Self {
            params,
            local,
            remote,
            local_retriever: Mutex::new(local_retriever),
            remote_retriever: Mutex::new(remote_retriever),
            sync_guard: JobGuard::new("sync"),
            reindex_guard: JobGuard::new("full_reindex"),
        })
    }

    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    /// The mode the next sync would run in.
    pub fn mode(&self) -> SyncMode {
        if self.params.local_index_path.exists() {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        }
    }

    /// One sync invocation. Never returns an error: failures are logged and
    /// reported as [`SyncOutcome::Aborted`].
    pub async fn run_sync(&self) -> SyncOutcome {
        let Some(_permit) = self.sync_guard.try_start() else {
            info!(job = self.sync_guard.name(), "previous run still in flight, skipping");
            return SyncOutcome::Skipped;
        };

        match self.sync_once().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(error = %reason, "sync aborted");
                SyncOutcome::Aborted { reason }
            }
        }
    }

    async fn sync_once(&self) -> Result<SyncOutcome> {
        let local = self.local.acquire().await?;
        let remote = self.remote.acquire().await?;

        let mut local_retriever = self.local_retriever.lock().await;
        let mut remote_retriever = self.remote_retriever.lock().await;

        let mode = self.mode();
        let lookback = match mode {
            SyncMode::Full => self.params.full_lookback,
            SyncMode::Incremental => self.params.incremental_lookback,
        };
        let now = Utc::now();

        let recent = remote
            .document_ids(Some(now - lookback))
            .await
            .context("listing recent remote documents")?;
        let known = local
            .document_ids(None)
            .await
            .context("listing local documents")?;
        let new_ids: Vec<String> = recent.difference(&known).cloned().collect();
        if new_ids.is_empty() {
            info!(mode = mode.as_str(), "no new documents");
            return Ok(SyncOutcome::NoNewDocuments);
        }

        let mut docs: Vec<Document> = Vec::with_capacity(new_ids.len());
        for chunk in new_ids.chunks(self.params.chunk_size) {
            docs.extend(
                remote
                    .documents_by_id(chunk)
                    .await
                    .context("fetching remote documents")?,
            );
        }
        info!(mode = mode.as_str(), count = docs.len(), "retrieved new documents");
        local
            .write_documents(&docs)
            .await
            .context("writing documents to local store")?;
        info!(count = docs.len(), "stored documents locally");

        let cand_path = &self.params.candidate_vectorizer_path;
        let rtrv_path = &self.params.retriever_vectorizer_path;
        let retrain = !cand_path.exists() || !rtrv_path.exists();
        remote_retriever
            .train_candidate_vectorizer(&*remote, retrain, cand_path)
            .await?;
        remote_retriever
            .train_retriever_vectorizer(&*remote, retrain, rtrv_path)
            .await?;
        if retrain {
            info!("vectorizers retrained");
            local_retriever.load_vectorizers(cand_path, rtrv_path).await?;
        } else {
            local_retriever
                .train_candidate_vectorizer(&*local, false, cand_path)
                .await?;
            local_retriever
                .train_retriever_vectorizer(&*local, false, rtrv_path)
                .await?;
        }
        info!("vectorizers loaded");

        let local_embeddings = local_retriever
            .update_embeddings(false, &self.params.local_index_path, &*local)
            .await?;
        let remote_embeddings = remote_retriever
            .update_embeddings(
                mode == SyncMode::Full,
                &self.params.remote_index_path,
                &*remote,
            )
            .await?;
        info!("embeddings updated");

        let local_batch = local_retriever.batch_retrieve(&docs, &*local).await?;
        let remote_batch = match mode {
            SyncMode::Full => local_batch.clone(),
            SyncMode::Incremental => remote_retriever.batch_retrieve(&docs, &*remote).await?,
        };

        let top_k = local_retriever.params().top_k;
        let staged: Vec<MetaPatch> = local_batch
            .records
            .iter()
            .zip(remote_batch.records.iter())
            .flat_map(|(l, r)| merge_by_rank(l, r, top_k, self.params.threshold))
            .collect();

        let mut patches = BatchReport::new();
        for chunk in staged.chunks(self.params.chunk_size) {
            let report = remote
                .update_documents_meta(chunk)
                .await
                .with_context(|| {
                    format!(
                        "applying metadata patches ({} of {} already written)",
                        patches.processed,
                        staged.len()
                    )
                })?;
            patches.merge(report);
        }
        if !patches.is_clean() {
            warn!(skipped = patches.skipped.len(), "some metadata patches were not applied");
        }
        info!(
            staged = staged.len(),
            applied = patches.processed,
            "similarity scores written to remote metadata"
        );

        let mut retrieval = local_batch.report;
        if mode == SyncMode::Incremental {
            retrieval.merge(remote_batch.report);
        }

        Ok(SyncOutcome::Completed(SyncReport {
            mode,
            synced: docs.len(),
            retrained: retrain,
            local_embeddings,
            remote_embeddings,
            retrieval,
            staged,
            patches,
        }))
    }

    /// Rebuild the remote embeddings and indices from scratch, then clear
    /// the local replica and its index.
    pub async fn run_full_remote_reindex(&self) -> ReindexOutcome {
        let Some(_permit) = self.reindex_guard.try_start() else {
            info!(job = self.reindex_guard.name(), "previous run still in flight, skipping");
            return ReindexOutcome::Skipped;
        };

        match self.reindex_once().await {
            Ok(report) => ReindexOutcome::Completed(report),
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(error = %reason, "full remote reindex aborted");
                ReindexOutcome::Aborted { reason }
            }
        }
    }

    async fn reindex_once(&self) -> Result<ReindexReport> {
        let local = self.local.acquire().await?;
        let remote = self.remote.acquire().await?;

        let mut local_retriever = self.local_retriever.lock().await;
        let mut remote_retriever = self.remote_retriever.lock().await;

        remote_retriever
            .train_candidate_vectorizer(&*remote, false, &self.params.candidate_vectorizer_path)
            .await?;
        remote_retriever
            .train_retriever_vectorizer(&*remote, false, &self.params.retriever_vectorizer_path)
            .await?;
        let remote_embeddings = remote_retriever
            .update_embeddings(true, &self.params.remote_index_path, &*remote)
            .await?;
        info!(
            embedded = remote_embeddings.embedded,
            "remote embeddings and index rebuilt"
        );

        let cleared = local
            .document_ids(None)
            .await
            .context("counting local documents")?
            .len();
        local
            .delete_all_documents()
            .await
            .context("clearing local store")?;
        local_retriever
            .reset_index(&self.params.local_index_path)
            .await?;
        info!(cleared, "local replica cleared");

        Ok(ReindexReport {
            remote_embeddings,
            cleared,
        })
    }
}
