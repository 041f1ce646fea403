//! Storage abstraction for TopDup.
//!
//! The [`DocumentStore`] trait defines every storage operation the sync,
//! retrieval and consolidation pipeline needs, so the local replica and the
//! remote source of truth can be backed independently (SQLite, in-memory,
//! or anything else).
//!
//! Implementations must be `Send + Sync` to work with async runtimes. No
//! cross-store transactions are assumed; consistency between stores is
//! eventual and driven by the sync engine's polling cadence.

pub mod memory;

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Document, EmbeddingSlot, MetaPatch, SimilarDocRow, SimilarPair};
use crate::report::BatchReport;

/// Abstract storage backend holding documents, their embeddings, their
/// similarity annotations and the `similar_docs` relation.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`document_ids`](DocumentStore::document_ids) | All ids, or ids modified since a time |
/// | [`documents_by_id`](DocumentStore::documents_by_id) | Fetch documents, missing ids omitted |
/// | [`write_documents`](DocumentStore::write_documents) | Upsert by id |
/// | [`write_embeddings`](DocumentStore::write_embeddings) | Store vectors for one slot |
/// | [`update_documents_meta`](DocumentStore::update_documents_meta) | Merge-patch similarity metadata |
/// | [`similar_documents_by_threshold`](DocumentStore::similar_documents_by_threshold) | Pairs above a threshold |
/// | [`delete_all_documents`](DocumentStore::delete_all_documents) | Clear the store |
/// | [`existing_sim_ids`](DocumentStore::existing_sim_ids) | Keys already in `similar_docs` |
/// | [`append_similar_docs`](DocumentStore::append_similar_docs) | Bulk append to `similar_docs` |
/// | [`ensure_sim_id_key`](DocumentStore::ensure_sim_id_key) | Self-heal the `sim_id` key |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cheap liveness probe, used before each run.
    async fn ping(&self) -> Result<()>;

    /// All document ids, or only those with `updated_at >= since`.
    async fn document_ids(&self, since: Option<DateTime<Utc>>) -> Result<BTreeSet<String>>;

    /// Fetch documents in the order of `ids`. Unknown ids are silently omitted.
    async fn documents_by_id(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Insert or replace documents by id, including any embeddings they carry.
    async fn write_documents(&self, docs: &[Document]) -> Result<()>;

    /// Store one embedding per document for `slot`, replacing previous ones.
    async fn write_embeddings(&self, slot: EmbeddingSlot, vectors: &[(String, Vec<f32>)])
        -> Result<()>;

    /// Merge each patch into its document's metadata and stamp the
    /// similarity-recorded time. A failing record is reported as skipped and
    /// does not block the others.
    async fn update_documents_meta(&self, patches: &[MetaPatch]) -> Result<BatchReport>;

    /// Pairs whose recorded similarity is strictly greater than `threshold`
    /// and was recorded at or after `since`.
    async fn similar_documents_by_threshold(
        &self,
        threshold: f32,
        since: DateTime<Utc>,
    ) -> Result<Vec<SimilarPair>>;

    /// Remove every document and embedding. The `similar_docs` relation is kept.
    async fn delete_all_documents(&self) -> Result<()>;

    /// Every `sim_id` in `similar_docs`; empty if the relation does not exist.
    async fn existing_sim_ids(&self) -> Result<HashSet<String>>;

    /// Append rows to `similar_docs`, creating the relation if needed.
    async fn append_similar_docs(&self, rows: &[SimilarDocRow]) -> Result<usize>;

    /// Make `sim_id` the relation's key. Already-present keys and a missing
    /// relation are not errors.
    async fn ensure_sim_id_key(&self) -> Result<()>;
}

/// Pairs from a set of annotated documents whose score exceeds `threshold`.
///
/// Shared by store backends: `annotated` are the documents whose similarity
/// was recorded inside the window, `lookup` resolves target ids. Targets
/// that cannot be resolved are dropped.
pub fn pairs_above_threshold<F>(annotated: &[Document], threshold: f32, mut lookup: F) -> Vec<SimilarPair>
where
    F: FnMut(&str) -> Option<Document>,
{
    let mut pairs = Vec::new();
    for doc in annotated {
        for ann in doc.similarity_annotations() {
            if ann.score <= threshold {
                continue;
            }
            if let Some(target) = lookup(&ann.similar_to) {
                pairs.push(SimilarPair {
                    source: doc.clone(),
                    target,
                    score: ann.score,
                });
            }
        }
    }
    pairs
}
