//! In-memory [`DocumentStore`] implementation for tests and embedding.
//!
//! Uses `BTreeMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! The `similar_docs` relation starts absent, is created on first append,
//! and rejects duplicate `sim_id`s once its key has been ensured, mirroring
//! how a relational backend behaves.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Document, EmbeddingSlot, MetaPatch, SimilarDocRow, SimilarPair};
use crate::report::BatchReport;

use super::{pairs_above_threshold, DocumentStore};

struct StoredDoc {
    doc: Document,
    sim_updated_at: Option<DateTime<Utc>>,
}

struct Relation {
    rows: Vec<SimilarDocRow>,
    keyed: bool,
}

/// In-memory store.
pub struct InMemoryStore {
    docs: RwLock<BTreeMap<String, StoredDoc>>,
    relation: RwLock<Option<Relation>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            relation: RwLock::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (or coming back). While unavailable
    /// every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    /// Snapshot of every stored document, ordered by id.
    pub fn documents(&self) -> Vec<Document> {
        let docs = self.docs.read().unwrap();
        docs.values().map(|s| s.doc.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows of `similar_docs`, or `None` if the relation was never created.
    pub fn similar_docs(&self) -> Option<Vec<SimilarDocRow>> {
        let relation = self.relation.read().unwrap();
        relation.as_ref().map(|r| r.rows.clone())
    }

    pub fn sim_id_keyed(&self) -> bool {
        let relation = self.relation.read().unwrap();
        relation.as_ref().map(|r| r.keyed).unwrap_or(false)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn document_ids(&self, since: Option<DateTime<Utc>>) -> Result<BTreeSet<String>> {
        self.check_available()?;
        let docs = self.docs.read().unwrap();
        Ok(docs
            .values()
            .filter(|s| since.map_or(true, |t| s.doc.updated_at >= t))
            .map(|s| s.doc.id.clone())
            .collect())
    }

    async fn documents_by_id(&self, ids: &[String]) -> Result<Vec<Document>> {
        self.check_available()?;
        let docs = self.docs.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|s| s.doc.clone()))
            .collect())
    }

    async fn write_documents(&self, new_docs: &[Document]) -> Result<()> {
        self.check_available()?;
        let mut docs = self.docs.write().unwrap();
        for doc in new_docs {
            let sim_updated_at = docs.get(&doc.id).and_then(|s| s.sim_updated_at);
            docs.insert(
                doc.id.clone(),
                StoredDoc {
                    doc: doc.clone(),
                    sim_updated_at,
                },
            );
        }
        Ok(())
    }

    async fn write_embeddings(
        &self,
        slot: EmbeddingSlot,
        vectors: &[(String, Vec<f32>)],
    ) -> Result<()> {
        self.check_available()?;
        let mut docs = self.docs.write().unwrap();
        for (id, vector) in vectors {
            if let Some(stored) = docs.get_mut(id) {
                stored.doc.embeddings.insert(slot, vector.clone());
            }
        }
        Ok(())
    }

    async fn update_documents_meta(&self, patches: &[MetaPatch]) -> Result<BatchReport> {
        self.check_available()?;
        let now = Utc::now();
        let mut report = BatchReport::new();
        let mut docs = self.docs.write().unwrap();
        for patch in patches {
            match docs.get_mut(&patch.document_id) {
                Some(stored) => {
                    stored.doc.meta.extend(patch.fields());
                    stored.sim_updated_at = Some(now);
                    report.record_ok();
                }
                None => report.record_skip(&patch.document_id, "document not found"),
            }
        }
        Ok(report)
    }

    async fn similar_documents_by_threshold(
        &self,
        threshold: f32,
        since: DateTime<Utc>,
    ) -> Result<Vec<SimilarPair>> {
        self.check_available()?;
        let docs = self.docs.read().unwrap();
        let annotated: Vec<Document> = docs
            .values()
            .filter(|s| s.sim_updated_at.map_or(false, |t| t >= since))
            .map(|s| s.doc.clone())
            .collect();
        Ok(pairs_above_threshold(&annotated, threshold, |id| {
            docs.get(id).map(|s| s.doc.clone())
        }))
    }

    async fn delete_all_documents(&self) -> Result<()> {
        self.check_available()?;
        self.docs.write().unwrap().clear();
        Ok(())
    }

    async fn existing_sim_ids(&self) -> Result<HashSet<String>> {
        self.check_available()?;
        let relation = self.relation.read().unwrap();
        Ok(relation
            .as_ref()
            .map(|r| r.rows.iter().map(|row| row.sim_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn append_similar_docs(&self, rows: &[SimilarDocRow]) -> Result<usize> {
        self.check_available()?;
        let mut relation = self.relation.write().unwrap();
        let relation = relation.get_or_insert_with(|| Relation {
            rows: Vec::new(),
            keyed: false,
        });

        if relation.keyed {
            let mut seen: HashSet<&str> = relation.rows.iter().map(|r| r.sim_id.as_str()).collect();
            for row in rows {
                if !seen.insert(row.sim_id.as_str()) {
                    bail!("duplicate key value violates unique constraint on sim_id ({})", row.sim_id);
                }
            }
        }

        relation.rows.extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn ensure_sim_id_key(&self) -> Result<()> {
        self.check_available()?;
        let mut relation = self.relation.write().unwrap();
        let Some(relation) = relation.as_mut() else {
            return Ok(());
        };
        if relation.keyed {
            return Ok(());
        }
        let unique: HashSet<&str> = relation.rows.iter().map(|r| r.sim_id.as_str()).collect();
        if unique.len() != relation.rows.len() {
            bail!("could not create unique key on sim_id: duplicate rows present");
        }
        relation.keyed = true;
        Ok(())
    }
}
