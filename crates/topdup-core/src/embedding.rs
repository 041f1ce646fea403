//! Vector utilities shared by the vectorizers, indices and stores.
//!
//! Pure helpers for vector serialization, normalization and similarity,
//! plus the atomic artifact writer used when persisting fitted models and
//! index snapshots.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{DedupError, Result};

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB produced by [`vec_to_blob`]. Trailing bytes that do not
/// form a whole `f32` are dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero vectors, so scoring never fails on degenerate input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Serialize `value` as JSON and atomically replace the file at `path`.
///
/// Writes to a sibling temp file first and renames it over the target, so
/// readers never observe a half-written artifact.
pub fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DedupError::artifact(parent, e))?;
        }
    }

    let bytes = serde_json::to_vec(value).map_err(|e| DedupError::corrupt(path, e))?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp).map_err(|e| DedupError::artifact(&tmp, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| DedupError::artifact(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| DedupError::artifact(path, e))?;
    Ok(())
}

/// Read and decode a JSON artifact written by [`write_artifact`].
pub fn read_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| DedupError::artifact(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| DedupError::corrupt(path, e))
}
