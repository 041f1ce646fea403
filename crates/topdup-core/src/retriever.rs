//! Two-stage similarity retrieval over one document store.
//!
//! A [`Retriever`] owns a candidate vectorizer + index and a retriever
//! (rerank) vectorizer + index. It never owns a store: every operation is
//! handed the store it should read from or write to, so the same trained
//! retriever survives reconnects.
//!
//! # Retrieval
//!
//! 1. Embed each subject with the candidate vectorizer and take the
//!    `candidate_k` nearest ids from the candidate index (the subject
//!    itself excluded).
//! 2. Re-embed the subject with the retriever vectorizer. Candidate vectors
//!    come from the rerank index; candidates missing there are fetched from
//!    the store and embedded.
//! 3. Score by cosine similarity and keep the `top_k` best, ranked from 1.
//!
//! CPU work runs on a blocking thread and fans out over a rayon pool sized
//! to the available cores. Output order always matches input order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::embedding::cosine_similarity;
use crate::index::{FlatIndex, VectorIndex};
use crate::models::{Document, EmbeddingSlot};
use crate::report::BatchReport;
use crate::similarity::{RankedMatch, SimilarityRecord};
use crate::store::DocumentStore;
use crate::vectorizer::{TfidfVectorizer, TrainOutcome, Vectorizer};

type Shared<T> = Arc<RwLock<T>>;

const FETCH_BATCH: usize = 1000;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    /// Neighbours fetched from the candidate index per subject.
    pub candidate_k: usize,
    /// Reranked matches kept per subject.
    pub top_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidate_k: 10,
            top_k: 1,
        }
    }
}

/// Result of [`Retriever::batch_retrieve`]: one record per input document,
/// in input order, plus the documents whose retrieval failed.
#[derive(Debug, Clone, Default)]
pub struct RetrievalBatch {
    pub records: Vec<SimilarityRecord>,
    pub report: BatchReport,
}

/// Result of [`Retriever::update_embeddings`].
#[derive(Debug, Clone, Default)]
pub struct EmbeddingUpdate {
    /// Documents embedded in this call.
    pub embedded: usize,
    /// Whether the indices were rebuilt from scratch.
    pub rebuilt: bool,
    pub report: BatchReport,
}

/// Location of the rerank index snapshot that accompanies a candidate
/// index artifact.
pub fn rerank_index_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".rerank");
    PathBuf::from(name)
}

fn poisoned(what: &str) -> anyhow::Error {
    anyhow!("{} lock poisoned", what)
}

pub struct Retriever {
    candidate: Shared<Box<dyn Vectorizer>>,
    retriever: Shared<Box<dyn Vectorizer>>,
    candidate_index: Shared<Box<dyn VectorIndex>>,
    rerank_index: Shared<Box<dyn VectorIndex>>,
    params: RetrievalParams,
    index_loaded: bool,
    embeddings_stale: bool,
}

impl Retriever {
    /// Assemble a retriever from its engines. Each index must match the
    /// dimensionality of its vectorizer.
    pub fn new(
        candidate: Box<dyn Vectorizer>,
        retriever: Box<dyn Vectorizer>,
        candidate_index: Box<dyn VectorIndex>,
        rerank_index: Box<dyn VectorIndex>,
        params: RetrievalParams,
    ) -> Result<Self> {
        if candidate.dims() != candidate_index.dims() {
            bail!(
                "candidate index has {} dims, vectorizer has {}",
                candidate_index.dims(),
                candidate.dims()
            );
        }
        if retriever.dims() != rerank_index.dims() {
            bail!(
                "rerank index has {} dims, vectorizer has {}",
                rerank_index.dims(),
                retriever.dims()
            );
        }
        if params.candidate_k == 0 || params.top_k == 0 {
            bail!("candidate_k and top_k must be >= 1");
        }

        Ok(Self {
            candidate: Arc::new(RwLock::new(candidate)),
            retriever: Arc::new(RwLock::new(retriever)),
            candidate_index: Arc::new(RwLock::new(candidate_index)),
            rerank_index: Arc::new(RwLock::new(rerank_index)),
            params,
            index_loaded: false,
            embeddings_stale: false,
        })
    }

    /// Retriever built on the default engines: hashed TF-IDF vectorizers
    /// and exact flat indices.
    pub fn tfidf(candidate_dims: usize, retriever_dims: usize, params: RetrievalParams) -> Result<Self> {
        Self::new(
            Box::new(TfidfVectorizer::new(candidate_dims)),
            Box::new(TfidfVectorizer::new(retriever_dims)),
            Box::new(FlatIndex::new(candidate_dims)),
            Box::new(FlatIndex::new(retriever_dims)),
            params,
        )
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    /// Both vectorizers are fitted or loaded.
    pub fn is_trained(&self) -> Result<bool> {
        let c = self.candidate.read().map_err(|_| poisoned("vectorizer"))?;
        let r = self.retriever.read().map_err(|_| poisoned("vectorizer"))?;
        Ok(c.is_fitted() && r.is_fitted())
    }

    /// Number of documents in the candidate index.
    pub fn indexed(&self) -> Result<usize> {
        Ok(self
            .candidate_index
            .read()
            .map_err(|_| poisoned("index"))?
            .len())
    }

    pub async fn train_candidate_vectorizer(
        &mut self,
        store: &dyn DocumentStore,
        retrain: bool,
        save_path: &Path,
    ) -> Result<TrainOutcome> {
        let target = self.candidate.clone();
        self.train_vectorizer(target, store, retrain, save_path).await
    }

    pub async fn train_retriever_vectorizer(
        &mut self,
        store: &dyn DocumentStore,
        retrain: bool,
        save_path: &Path,
    ) -> Result<TrainOutcome> {
        let target = self.retriever.clone();
        self.train_vectorizer(target, store, retrain, save_path).await
    }

    /// Unconditionally load both vectorizers from their artifacts, e.g.
    /// after another retriever refitted them. Existing embeddings are then
    /// considered stale.
    pub async fn load_vectorizers(&mut self, candidate_path: &Path, retriever_path: &Path) -> Result<()> {
        let candidate = self.candidate.clone();
        let retriever = self.retriever.clone();
        let (cp, rp) = (candidate_path.to_path_buf(), retriever_path.to_path_buf());
        tokio::task::spawn_blocking(move || -> Result<()> {
            candidate
                .write()
                .map_err(|_| poisoned("vectorizer"))?
                .load(&cp)?;
            retriever
                .write()
                .map_err(|_| poisoned("vectorizer"))?
                .load(&rp)?;
            Ok(())
        })
        .await??;
        self.embeddings_stale = true;
        Ok(())
    }

    async fn train_vectorizer(
        &mut self,
        target: Shared<Box<dyn Vectorizer>>,
        store: &dyn DocumentStore,
        retrain: bool,
        save_path: &Path,
    ) -> Result<TrainOutcome> {
        let fitted = target.read().map_err(|_| poisoned("vectorizer"))?.is_fitted();
        if fitted && !retrain {
            return Ok(TrainOutcome::Loaded);
        }

        let needs_corpus = retrain || !save_path.exists();
        let corpus: Vec<String> = if needs_corpus {
            let ids: Vec<String> = store.document_ids(None).await?.into_iter().collect();
            let mut corpus = Vec::with_capacity(ids.len());
            for batch in ids.chunks(FETCH_BATCH) {
                corpus.extend(
                    store
                        .documents_by_id(batch)
                        .await?
                        .into_iter()
                        .map(|d| d.content),
                );
            }
            corpus
        } else {
            Vec::new()
        };

        let path = save_path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || -> Result<TrainOutcome> {
            let refs: Vec<&str> = corpus.iter().map(String::as_str).collect();
            let mut v = target.write().map_err(|_| poisoned("vectorizer"))?;
            Ok(v.train(&refs, retrain, &path)?)
        })
        .await??;

        if outcome == TrainOutcome::Fitted {
            info!(path = %save_path.display(), "vectorizer fitted");
            self.embeddings_stale = true;
        } else {
            debug!(path = %save_path.display(), "vectorizer loaded");
        }
        Ok(outcome)
    }

    /// Embed the store's documents, write the vectors back to the store and
    /// update both indices, then persist the indices to `save_path`.
    ///
    /// With `retrain` the indices are rebuilt from every document in the
    /// store. Otherwise only documents missing from the indices are embedded
    /// and added, unless the indices reference documents the store no
    /// longer has or the vectorizers changed, in which case a rebuild is
    /// forced.
    pub async fn update_embeddings(
        &mut self,
        retrain: bool,
        save_path: &Path,
        store: &dyn DocumentStore,
    ) -> Result<EmbeddingUpdate> {
        if !self.is_trained()? {
            bail!("vectorizers must be trained before updating embeddings");
        }

        if !self.index_loaded && !retrain && save_path.exists() {
            self.load_indices(save_path).await?;
        }

        let store_ids = store.document_ids(None).await?;
        let mut rebuild = retrain || self.embeddings_stale;
        let (indexed_ids, rerank_ids) = {
            let c = self.candidate_index.read().map_err(|_| poisoned("index"))?;
            let r = self.rerank_index.read().map_err(|_| poisoned("index"))?;
            (c.ids(), r.ids())
        };
        if !rebuild {
            let stale = indexed_ids
                .iter()
                .chain(rerank_ids.iter())
                .any(|id| !store_ids.contains(id));
            if stale {
                warn!("index references documents missing from the store, forcing reindex");
                rebuild = true;
            }
        }

        let targets: Vec<String> = if rebuild {
            store_ids.iter().cloned().collect()
        } else {
            let have: HashSet<&String> = indexed_ids.iter().collect();
            let have_rerank: HashSet<&String> = rerank_ids.iter().collect();
            store_ids
                .iter()
                .filter(|id| !have.contains(id) || !have_rerank.contains(id))
                .cloned()
                .collect()
        };

        let mut update = EmbeddingUpdate {
            rebuilt: rebuild,
            ..Default::default()
        };
        let mut cand_entries = Vec::with_capacity(targets.len());
        let mut rerank_entries = Vec::with_capacity(targets.len());

        for batch in targets.chunks(FETCH_BATCH) {
            let docs = store.documents_by_id(batch).await?;
            let (cand, rerank, report) = self.embed_documents(docs).await?;
            store.write_embeddings(EmbeddingSlot::Candidate, &cand).await?;
            store.write_embeddings(EmbeddingSlot::Retriever, &rerank).await?;
            update.embedded += cand.len();
            update.report.merge(report);
            cand_entries.extend(cand);
            rerank_entries.extend(rerank);
        }

        let candidate_index = self.candidate_index.clone();
        let rerank_index = self.rerank_index.clone();
        let path = save_path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut c = candidate_index.write().map_err(|_| poisoned("index"))?;
            let mut r = rerank_index.write().map_err(|_| poisoned("index"))?;
            if rebuild {
                c.rebuild(cand_entries)?;
                r.rebuild(rerank_entries)?;
            } else {
                c.add(cand_entries)?;
                r.add(rerank_entries)?;
            }
            c.save(&path)?;
            r.save(&rerank_index_path(&path))?;
            Ok(())
        })
        .await??;

        self.index_loaded = true;
        self.embeddings_stale = false;
        info!(
            embedded = update.embedded,
            rebuilt = update.rebuilt,
            skipped = update.report.skipped.len(),
            path = %save_path.display(),
            "embeddings updated"
        );
        Ok(update)
    }

    /// Empty both indices and persist the empty state.
    pub async fn reset_index(&mut self, save_path: &Path) -> Result<()> {
        let candidate_index = self.candidate_index.clone();
        let rerank_index = self.rerank_index.clone();
        let path = save_path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut c = candidate_index.write().map_err(|_| poisoned("index"))?;
            let mut r = rerank_index.write().map_err(|_| poisoned("index"))?;
            c.rebuild(Vec::new())?;
            r.rebuild(Vec::new())?;
            c.save(&path)?;
            r.save(&rerank_index_path(&path))?;
            Ok(())
        })
        .await??;
        self.index_loaded = true;
        Ok(())
    }

    async fn load_indices(&mut self, save_path: &Path) -> Result<()> {
        let candidate_index = self.candidate_index.clone();
        let rerank_index = self.rerank_index.clone();
        let path = save_path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            candidate_index
                .write()
                .map_err(|_| poisoned("index"))?
                .load(&path)?;
            let rerank_path = rerank_index_path(&path);
            if rerank_path.exists() {
                rerank_index
                    .write()
                    .map_err(|_| poisoned("index"))?
                    .load(&rerank_path)?;
            }
            Ok(())
        })
        .await??;
        self.index_loaded = true;
        debug!(path = %save_path.display(), "index loaded");
        Ok(())
    }

    /// Candidate and retriever embeddings for `docs`. A document whose
    /// transform fails is reported and left out of both lists.
    async fn embed_documents(
        &self,
        docs: Vec<Document>,
    ) -> Result<(Vec<(String, Vec<f32>)>, Vec<(String, Vec<f32>)>, BatchReport)> {
        let candidate = self.candidate.clone();
        let retriever = self.retriever.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let c = candidate.read().map_err(|_| poisoned("vectorizer"))?;
            let r = retriever.read().map_err(|_| poisoned("vectorizer"))?;
            let (c, r): (&dyn Vectorizer, &dyn Vectorizer) = (&**c, &**r);

            let results: Vec<(String, Result<(Vec<f32>, Vec<f32>), String>)> = docs
                .par_iter()
                .map(|doc| {
                    let pair = c
                        .transform(&doc.content)
                        .and_then(|cv| r.transform(&doc.content).map(|rv| (cv, rv)))
                        .map_err(|e| e.to_string());
                    (doc.id.clone(), pair)
                })
                .collect();

            let mut cand = Vec::with_capacity(results.len());
            let mut rerank = Vec::with_capacity(results.len());
            let mut report = BatchReport::new();
            for (id, res) in results {
                match res {
                    Ok((cv, rv)) => {
                        cand.push((id.clone(), cv));
                        rerank.push((id, rv));
                        report.record_ok();
                    }
                    Err(reason) => report.record_skip(id, reason),
                }
            }
            Ok((cand, rerank, report))
        })
        .await?
    }

    /// Two-stage retrieval for each document in `docs`.
    ///
    /// A failure for one document never aborts the batch: its record is
    /// emitted with no matches and the reason lands in the report.
    pub async fn batch_retrieve(
        &self,
        docs: &[Document],
        store: &dyn DocumentStore,
    ) -> Result<RetrievalBatch> {
        let subjects: Arc<Vec<(String, String)>> = Arc::new(
            docs.iter()
                .map(|d| (d.id.clone(), d.content.clone()))
                .collect(),
        );
        let k = self.params.candidate_k;

        // Stage 1: candidate generation.
        let candidate = self.candidate.clone();
        let candidate_index = self.candidate_index.clone();
        let stage_subjects = subjects.clone();
        let candidates: Vec<Result<Vec<String>, String>> =
            tokio::task::spawn_blocking(move || -> Result<_> {
                let v = candidate.read().map_err(|_| poisoned("vectorizer"))?;
                let idx = candidate_index.read().map_err(|_| poisoned("index"))?;
                let (v, idx): (&dyn Vectorizer, &dyn VectorIndex) = (&**v, &**idx);
                Ok(stage_subjects
                    .par_iter()
                    .map(|(id, content)| -> Result<Vec<String>, String> {
                        let query = v.transform(content).map_err(|e| e.to_string())?;
                        let hits = idx.nearest(&query, k + 1).map_err(|e| e.to_string())?;
                        Ok(hits
                            .into_iter()
                            .filter(|h| &h.id != id)
                            .take(k)
                            .map(|h| h.id)
                            .collect())
                    })
                    .collect())
            })
            .await??;

        // Candidates without a rerank vector are re-embedded from the store.
        let unique: HashSet<&String> = candidates
            .iter()
            .filter_map(|c| c.as_ref().ok())
            .flatten()
            .collect();
        let missing: Vec<String> = {
            let r = self.rerank_index.read().map_err(|_| poisoned("index"))?;
            let mut missing: Vec<String> = unique
                .iter()
                .filter(|id| !r.contains(id.as_str()))
                .map(|id| id.to_string())
                .collect();
            missing.sort();
            missing
        };
        let mut fetched: HashMap<String, String> = HashMap::new();
        for batch in missing.chunks(FETCH_BATCH) {
            for doc in store.documents_by_id(batch).await? {
                fetched.insert(doc.id, doc.content);
            }
        }

        // Stage 2: rerank.
        let retriever = self.retriever.clone();
        let rerank_index = self.rerank_index.clone();
        let top_k = self.params.top_k;
        let rerank_subjects = subjects.clone();
        let outcomes: Vec<(SimilarityRecord, Option<String>)> =
            tokio::task::spawn_blocking(move || -> Result<_> {
                let v = retriever.read().map_err(|_| poisoned("vectorizer"))?;
                let idx = rerank_index.read().map_err(|_| poisoned("index"))?;
                let (v, idx): (&dyn Vectorizer, &dyn VectorIndex) = (&**v, &**idx);

                let mut wanted: Vec<&String> = candidates
                    .iter()
                    .filter_map(|c| c.as_ref().ok())
                    .flatten()
                    .collect();
                wanted.sort();
                wanted.dedup();
                let vectors: HashMap<String, Vec<f32>> = wanted
                    .par_iter()
                    .filter_map(|id| {
                        let vec = idx.vector(id).or_else(|| {
                            fetched.get(*id).and_then(|content| v.transform(content).ok())
                        })?;
                        Some(((*id).clone(), vec))
                    })
                    .collect();

                Ok(rerank_subjects
                    .par_iter()
                    .zip(candidates.par_iter())
                    .map(|((id, content), cands)| {
                        let cands = match cands {
                            Ok(c) => c,
                            Err(reason) => {
                                return (SimilarityRecord::empty(id.clone()), Some(reason.clone()))
                            }
                        };
                        let subject = match v.transform(content) {
                            Ok(s) => s,
                            Err(e) => return (SimilarityRecord::empty(id.clone()), Some(e.to_string())),
                        };

                        let mut scored: Vec<(&String, f32)> = cands
                            .iter()
                            .filter_map(|c| {
                                vectors
                                    .get(c)
                                    .map(|vec| (c, cosine_similarity(&subject, vec)))
                            })
                            .collect();
                        scored.sort_by(|a, b| {
                            b.1.partial_cmp(&a.1)
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then_with(|| a.0.cmp(b.0))
                        });

                        let matches = scored
                            .into_iter()
                            .take(top_k)
                            .enumerate()
                            .map(|(i, (cand, score))| RankedMatch {
                                rank: i + 1,
                                candidate_id: cand.clone(),
                                score,
                            })
                            .collect();
                        (
                            SimilarityRecord {
                                document_id: id.clone(),
                                matches,
                            },
                            None,
                        )
                    })
                    .collect())
            })
            .await??;

        let mut batch = RetrievalBatch::default();
        for (record, failure) in outcomes {
            match failure {
                Some(reason) => batch.report.record_skip(record.document_id.clone(), reason),
                None => batch.report.record_ok(),
            }
            batch.records.push(record);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    const ARTICLES: [(&str, &str); 4] = [
        ("a", "Giá xăng dầu hôm nay tăng mạnh theo thông báo của liên bộ"),
        ("b", "Giá xăng dầu hôm nay tăng mạnh theo thông báo mới của liên bộ tài chính"),
        ("c", "Đội tuyển Việt Nam thắng đậm trong trận đấu vòng loại"),
        ("d", "Thời tiết miền Bắc chuyển rét đậm rét hại từ cuối tuần"),
    ];

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let docs: Vec<Document> = ARTICLES
            .iter()
            .map(|(id, content)| Document::new(*id, *content))
            .collect();
        store.write_documents(&docs).await.unwrap();
        store
    }

    async fn trained(store: &InMemoryStore, dir: &Path) -> Retriever {
        let mut r = Retriever::tfidf(64, 128, RetrievalParams::default()).unwrap();
        r.train_candidate_vectorizer(store, false, &dir.join("cand.bin"))
            .await
            .unwrap();
        r.train_retriever_vectorizer(store, false, &dir.join("rtrv.bin"))
            .await
            .unwrap();
        r
    }

    #[tokio::test]
    async fn test_update_embeddings_writes_store_and_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = seeded_store().await;
        let mut r = trained(&store, tmp.path()).await;
        let idx = tmp.path().join("idx.bin");

        let update = r.update_embeddings(false, &idx, &store).await.unwrap();
        assert_eq!(update.embedded, 4);
        assert!(update.rebuilt, "freshly fitted vectorizers force a rebuild");
        assert_eq!(r.indexed().unwrap(), 4);
        assert!(idx.exists());
        assert!(rerank_index_path(&idx).exists());

        let doc = &store.documents()[0];
        assert_eq!(doc.embedding(EmbeddingSlot::Candidate).unwrap().len(), 64);
        assert_eq!(doc.embedding(EmbeddingSlot::Retriever).unwrap().len(), 128);

        let again = r.update_embeddings(false, &idx, &store).await.unwrap();
        assert_eq!(again.embedded, 0);
        assert!(!again.rebuilt);
    }

    #[tokio::test]
    async fn test_incremental_add_only_embeds_new_documents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = seeded_store().await;
        let mut r = trained(&store, tmp.path()).await;
        let idx = tmp.path().join("idx.bin");
        r.update_embeddings(false, &idx, &store).await.unwrap();

        store
            .write_documents(&[Document::new("e", "Giá vàng tăng mạnh")])
            .await
            .unwrap();
        let update = r.update_embeddings(false, &idx, &store).await.unwrap();
        assert_eq!(update.embedded, 1);
        assert!(!update.rebuilt);
        assert_eq!(r.indexed().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_stale_index_forces_rebuild() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = seeded_store().await;
        let mut r = trained(&store, tmp.path()).await;
        let idx = tmp.path().join("idx.bin");
        r.update_embeddings(false, &idx, &store).await.unwrap();

        store.delete_all_documents().await.unwrap();
        store
            .write_documents(&[Document::new("z", "Giá xăng dầu hôm nay")])
            .await
            .unwrap();
        let update = r.update_embeddings(false, &idx, &store).await.unwrap();
        assert!(update.rebuilt);
        assert_eq!(r.indexed().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_retrieve_ranks_paraphrase_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = seeded_store().await;
        let mut r = trained(&store, tmp.path()).await;
        r.update_embeddings(true, &tmp.path().join("idx.bin"), &store)
            .await
            .unwrap();

        let docs = store.documents();
        let batch = r.batch_retrieve(&docs, &store).await.unwrap();
        assert_eq!(batch.records.len(), 4);
        assert!(batch.report.is_clean());

        let ids: Vec<&str> = batch.records.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let a = &batch.records[0];
        assert_eq!(a.matches.len(), 1);
        assert_eq!(a.matches[0].rank, 1);
        assert_eq!(a.matches[0].candidate_id, "b");
        assert!(a.matches[0].score > 0.5);
        assert!(batch
            .records
            .iter()
            .all(|rec| rec.matches.iter().all(|m| m.candidate_id != rec.document_id)));
    }

    #[tokio::test]
    async fn test_untrained_retrieval_reports_every_document() {
        let store = seeded_store().await;
        let r = Retriever::tfidf(16, 32, RetrievalParams::default()).unwrap();
        let docs = store.documents();
        let batch = r.batch_retrieve(&docs, &store).await.unwrap();
        assert_eq!(batch.records.len(), 4);
        assert!(batch.records.iter().all(|rec| rec.matches.is_empty()));
        assert_eq!(batch.report.skipped.len(), 4);
    }

    #[tokio::test]
    async fn test_indices_reloaded_from_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = seeded_store().await;
        let idx = tmp.path().join("idx.bin");
        {
            let mut r = trained(&store, tmp.path()).await;
            r.update_embeddings(false, &idx, &store).await.unwrap();
        }

        let mut fresh = trained(&store, tmp.path()).await;
        let update = fresh.update_embeddings(false, &idx, &store).await.unwrap();
        assert_eq!(update.embedded, 0);
        assert_eq!(fresh.indexed().unwrap(), 4);
    }

    #[test]
    fn test_mismatched_engines_rejected() {
        let err = Retriever::new(
            Box::new(TfidfVectorizer::new(8)),
            Box::new(TfidfVectorizer::new(16)),
            Box::new(FlatIndex::new(4)),
            Box::new(FlatIndex::new(16)),
            RetrievalParams::default(),
        );
        assert!(err.is_err());
    }
}
