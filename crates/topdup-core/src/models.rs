//! Core data models used throughout TopDup.
//!
//! These types represent the documents, metadata patches, similar pairs and
//! consolidated rows that flow between the stores and the pipeline engines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which vectorizer produced an embedding.
///
/// Candidate and retriever vectors have different dimensionality and are
/// never interchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSlot {
    /// Low-dimensional vectors used for nearest-neighbour candidate generation.
    Candidate,
    /// Higher-dimensional vectors used to rerank candidates.
    Retriever,
}

impl EmbeddingSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingSlot::Candidate => "candidate",
            EmbeddingSlot::Retriever => "retriever",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(EmbeddingSlot::Candidate),
            "retriever" => Some(EmbeddingSlot::Retriever),
            _ => None,
        }
    }
}

/// A news article as held by one store.
///
/// The same id may exist in both the local and the remote store as
/// independent copies; the sync engine keeps them aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within a store.
    pub id: String,
    /// Free-text article body.
    pub content: String,
    /// Article metadata (`domain`, `url`, `publish_date`, `title`, ...) plus
    /// per-rank similarity annotations.
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Named embedding vectors, at most one per slot.
    #[serde(default)]
    pub embeddings: BTreeMap<EmbeddingSlot, Vec<f32>>,
    /// Last modification time, used for incremental pulls.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            meta: Map::new(),
            embeddings: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn embedding(&self, slot: EmbeddingSlot) -> Option<&[f32]> {
        self.embeddings.get(&slot).map(|v| v.as_slice())
    }

    /// Similarity annotations recorded in this document's metadata.
    pub fn similarity_annotations(&self) -> Vec<SimilarityAnnotation> {
        SimilarityAnnotation::from_meta(&self.meta)
    }
}

/// One `sim_score_<rank>` / `similar_to_<rank>` field pair found in metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityAnnotation {
    pub rank: usize,
    pub similar_to: String,
    pub score: f32,
}

impl SimilarityAnnotation {
    /// Parse all complete rank annotations out of a metadata map, ordered by
    /// rank. A rank with only one of its two fields is ignored.
    pub fn from_meta(meta: &Map<String, Value>) -> Vec<SimilarityAnnotation> {
        let mut out: Vec<SimilarityAnnotation> = meta
            .iter()
            .filter_map(|(key, value)| {
                let rank: usize = key.strip_prefix("sim_score_")?.parse().ok()?;
                let score = value.as_f64()? as f32;
                let similar_to = meta
                    .get(&format!("similar_to_{}", rank))?
                    .as_str()?
                    .to_string();
                Some(SimilarityAnnotation {
                    rank,
                    similar_to,
                    score,
                })
            })
            .collect();
        out.sort_by_key(|a| a.rank);
        out
    }
}

/// A staged similarity annotation for one document and one rank.
///
/// Serialized at the store boundary into the rank-encoded fields
/// `{document_id, sim_score_<rank>, similar_to_<rank>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaPatch {
    pub document_id: String,
    pub rank: usize,
    pub score: f32,
    pub similar_to: String,
}

impl MetaPatch {
    /// The metadata fields this patch merges into the document.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(
            format!("sim_score_{}", self.rank),
            Value::from(self.score as f64),
        );
        fields.insert(
            format!("similar_to_{}", self.rank),
            Value::from(self.similar_to.clone()),
        );
        fields
    }

    /// The full external patch shape, including `document_id`.
    pub fn to_json(&self) -> Value {
        let mut fields = self.fields();
        fields.insert(
            "document_id".to_string(),
            Value::from(self.document_id.clone()),
        );
        Value::Object(fields)
    }
}

/// Two documents whose recorded similarity exceeded a threshold.
#[derive(Debug, Clone)]
pub struct SimilarPair {
    /// The document carrying the annotation.
    pub source: Document,
    /// The document it was found similar to.
    pub target: Document,
    pub score: f32,
}

/// A row of the persisted `similar_docs` relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDocRow {
    pub document_id_a: String,
    pub document_id_b: String,
    pub domain_a: Option<String>,
    pub domain_b: Option<String>,
    pub url_a: Option<String>,
    pub url_b: Option<String>,
    pub publish_date_a: Option<String>,
    pub publish_date_b: Option<String>,
    pub title_a: Option<String>,
    pub title_b: Option<String>,
    pub sim_score: f32,
    pub sim_id: String,
}
