//! Trainable text-to-vector transformers.
//!
//! The [`Vectorizer`] trait is the contract the retriever consumes; each
//! retriever owns two instances, a low-dimensional candidate vectorizer and
//! a higher-dimensional retriever vectorizer. [`TfidfVectorizer`] is the
//! default engine: hashed unigram + bigram TF-IDF with a fixed output size.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{l2_normalize, read_artifact, write_artifact};
use crate::error::{DedupError, Result};

/// How a call to [`Vectorizer::train`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    /// An existing artifact was loaded.
    Loaded,
    /// The model was fitted on the corpus and persisted.
    Fitted,
}

/// A fitted transformer with fixed output dimensionality.
pub trait Vectorizer: Send + Sync {
    /// Output vector length.
    fn dims(&self) -> usize;

    fn is_fitted(&self) -> bool;

    /// Fit the model on `corpus`, replacing any previous fit.
    fn fit(&mut self, corpus: &[&str]) -> Result<()>;

    /// Embed `text`. Empty or degenerate text yields a zero vector.
    fn transform(&self, text: &str) -> Result<Vec<f32>>;

    /// Persist the fitted model, atomically replacing `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace the current model with the artifact at `path`.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Load the artifact at `path` unless `retrain` is set or no artifact
    /// exists, in which case fit on `corpus` and persist to `path`.
    fn train(&mut self, corpus: &[&str], retrain: bool, path: &Path) -> Result<TrainOutcome> {
        if !retrain && path.exists() {
            self.load(path)?;
            return Ok(TrainOutcome::Loaded);
        }
        self.fit(corpus)?;
        self.save(path)?;
        Ok(TrainOutcome::Fitted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TfidfModel {
    dims: usize,
    n_docs: usize,
    idf: Vec<f32>,
}

/// Hashed TF-IDF vectorizer.
///
/// Lower-cased alphanumeric tokens and adjacent-token bigrams are hashed
/// into `dims` buckets. Fitting learns a smoothed inverse document
/// frequency per bucket; output vectors are L2-normalised.
pub struct TfidfVectorizer {
    dims: usize,
    model: Option<TfidfModel>,
}

impl TfidfVectorizer {
    pub fn new(dims: usize) -> Self {
        Self { dims, model: None }
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dims as u64) as usize
    }

    fn buckets(&self, text: &str) -> Vec<usize> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut out = Vec::with_capacity(tokens.len() * 2);
        for (i, token) in tokens.iter().enumerate() {
            out.push(self.bucket(token));
            if let Some(next) = tokens.get(i + 1) {
                out.push(self.bucket(&format!("{} {}", token, next)));
            }
        }
        out
    }
}

impl Vectorizer for TfidfVectorizer {
    fn dims(&self) -> usize {
        self.dims
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fit(&mut self, corpus: &[&str]) -> Result<()> {
        if corpus.is_empty() {
            return Err(DedupError::EmptyCorpus);
        }

        let mut df = vec![0u32; self.dims];
        for text in corpus {
            let seen: HashSet<usize> = self.buckets(text).into_iter().collect();
            for b in seen {
                df[b] += 1;
            }
        }

        let n = corpus.len() as f32;
        let idf = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();

        self.model = Some(TfidfModel {
            dims: self.dims,
            n_docs: corpus.len(),
            idf,
        });
        Ok(())
    }

    fn transform(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.as_ref().ok_or(DedupError::NotFitted)?;
        let mut vec = vec![0.0f32; self.dims];
        for b in self.buckets(text) {
            vec[b] += model.idf[b];
        }
        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let model = self.model.as_ref().ok_or(DedupError::NotFitted)?;
        write_artifact(path, model)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: TfidfModel = read_artifact(path)?;
        if model.dims != self.dims || model.idf.len() != self.dims {
            return Err(DedupError::DimensionMismatch {
                expected: self.dims,
                actual: model.idf.len(),
            });
        }
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    const CORPUS: [&str; 3] = [
        "Giá xăng tăng mạnh trong tuần này",
        "Giá xăng tăng mạnh trong tuần này theo bộ công thương",
        "Đội tuyển bóng đá giành chiến thắng",
    ];

    fn fitted(dims: usize) -> TfidfVectorizer {
        let mut v = TfidfVectorizer::new(dims);
        v.fit(&CORPUS).unwrap();
        v
    }

    #[test]
    fn test_transform_has_fixed_dims() {
        let v = fitted(64);
        assert_eq!(v.transform(CORPUS[0]).unwrap().len(), 64);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = fitted(32);
        let out = v.transform("  ... ").unwrap();
        assert_eq!(out.len(), 32);
        assert!(out.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_unfitted_transform_fails() {
        let v = TfidfVectorizer::new(16);
        assert!(matches!(v.transform("x"), Err(DedupError::NotFitted)));
    }

    #[test]
    fn test_paraphrase_scores_higher_than_unrelated() {
        let v = fitted(1024);
        let a = v.transform(CORPUS[0]).unwrap();
        let b = v.transform(CORPUS[1]).unwrap();
        let c = v.transform(CORPUS[2]).unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let a = fitted(128).transform(CORPUS[1]).unwrap();
        let b = fitted(128).transform(CORPUS[1]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_loads_existing_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cand.bin");

        let mut first = TfidfVectorizer::new(64);
        assert_eq!(
            first.train(&CORPUS, false, &path).unwrap(),
            TrainOutcome::Fitted
        );

        let mut second = TfidfVectorizer::new(64);
        assert_eq!(
            second.train(&[], false, &path).unwrap(),
            TrainOutcome::Loaded
        );
        assert_eq!(
            first.transform(CORPUS[2]).unwrap(),
            second.transform(CORPUS[2]).unwrap()
        );
    }

    #[test]
    fn test_load_rejects_other_dimension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rtrv.bin");
        fitted(64).save(&path).unwrap();

        let mut other = TfidfVectorizer::new(128);
        assert!(matches!(
            other.load(&path),
            Err(DedupError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fit_empty_corpus_fails() {
        let mut v = TfidfVectorizer::new(8);
        assert!(matches!(v.fit(&[]), Err(DedupError::EmptyCorpus)));
    }
}
