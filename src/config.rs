//! Configuration parsing and validation.
//!
//! TopDup is configured via a TOML file (default `./config/topdup.toml`).
//! Every key has a built-in default, so a missing file is not an error.
//! After parsing, a fixed set of environment variables override individual
//! keys, then the result is validated.
//!
//! # Example
//!
//! ```toml
//! [stores]
//! local_path = "./data/local.db"
//! remote_path = "./data/remote.db"
//!
//! [similarity]
//! threshold = 0.8
//! candidate_k = 10
//! top_k = 1
//!
//! [schedule]
//! sync_every_secs = 60
//! full_reindex_at = "00:00"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Key |
//! |----------|-----|
//! | `LOCAL_DB_URI` | `stores.local_path` |
//! | `REMOTE_DB_URI`, `POSTGRES_URI` | `stores.remote_path` |
//! | `STORE_TIMEOUT_SECS` | `stores.timeout_secs` |
//! | `HARD_SIM_THRESHOLD` | `similarity.threshold` |
//! | `CAND_PATH` | `vectorizer.candidate_path` |
//! | `RTRV_PATH` | `vectorizer.retriever_path` |
//! | `LOCAL_IDX_PATH` | `index.local_path` |
//! | `REMOTE_IDX_PATH` | `index.remote_path` |

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveTime};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use topdup_core::consolidate::ConsolidationParams;
use topdup_core::retriever::RetrievalParams;
use topdup_core::sync::SyncParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub vectorizer: VectorizerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoresConfig {
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    #[serde(default = "default_remote_path")]
    pub remote_path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            remote_path: default_remote_path(),
            timeout_secs: default_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_local_path() -> PathBuf {
    PathBuf::from("local.db")
}
fn default_remote_path() -> PathBuf {
    PathBuf::from("remote.db")
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_threshold() -> f32 {
    0.8
}
fn default_candidate_k() -> usize {
    10
}
fn default_top_k() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorizerConfig {
    #[serde(default = "default_candidate_dims")]
    pub candidate_dims: usize,
    #[serde(default = "default_retriever_dims")]
    pub retriever_dims: usize,
    #[serde(default = "default_candidate_path")]
    pub candidate_path: PathBuf,
    #[serde(default = "default_retriever_path")]
    pub retriever_path: PathBuf,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            candidate_dims: default_candidate_dims(),
            retriever_dims: default_retriever_dims(),
            candidate_path: default_candidate_path(),
            retriever_path: default_retriever_path(),
        }
    }
}

fn default_candidate_dims() -> usize {
    768
}
fn default_retriever_dims() -> usize {
    1024
}
fn default_candidate_path() -> PathBuf {
    PathBuf::from("vectorizer_cand.bin")
}
fn default_retriever_path() -> PathBuf {
    PathBuf::from("vectorizer_rtrv.bin")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_local_index")]
    pub local_path: PathBuf,
    #[serde(default = "default_remote_index")]
    pub remote_path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_index(),
            remote_path: default_remote_index(),
        }
    }
}

fn default_local_index() -> PathBuf {
    PathBuf::from("faiss_index_local.bin")
}
fn default_remote_index() -> PathBuf {
    PathBuf::from("faiss_index_remote.bin")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_incremental_lookback_secs")]
    pub incremental_lookback_secs: i64,
    #[serde(default = "default_full_lookback_days")]
    pub full_lookback_days: i64,
    #[serde(default = "default_patch_chunk_size")]
    pub patch_chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            incremental_lookback_secs: default_incremental_lookback_secs(),
            full_lookback_days: default_full_lookback_days(),
            patch_chunk_size: default_patch_chunk_size(),
        }
    }
}

fn default_incremental_lookback_secs() -> i64 {
    180
}
fn default_full_lookback_days() -> i64 {
    365
}
fn default_patch_chunk_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidationConfig {
    #[serde(default = "default_incremental_lookback_secs")]
    pub lookback_secs: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            lookback_secs: default_incremental_lookback_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_every_secs")]
    pub sync_every_secs: u64,
    #[serde(default = "default_every_secs")]
    pub consolidate_every_secs: u64,
    /// Daily full remote reindex, `HH:MM` in UTC.
    #[serde(default = "default_full_reindex_at")]
    pub full_reindex_at: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_every_secs: default_every_secs(),
            consolidate_every_secs: default_every_secs(),
            full_reindex_at: default_full_reindex_at(),
        }
    }
}

fn default_every_secs() -> u64 {
    60
}
fn default_full_reindex_at() -> String {
    "00:00".to_string()
}

impl ScheduleConfig {
    pub fn full_reindex_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.full_reindex_at, "%H:%M").with_context(|| {
            format!(
                "schedule.full_reindex_at must be HH:MM, got '{}'",
                self.full_reindex_at
            )
        })
    }
}

impl Config {
    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_k: self.similarity.candidate_k,
            top_k: self.similarity.top_k,
        }
    }

    pub fn sync_params(&self) -> SyncParams {
        SyncParams {
            threshold: self.similarity.threshold,
            incremental_lookback: Duration::seconds(self.sync.incremental_lookback_secs),
            full_lookback: Duration::days(self.sync.full_lookback_days),
            chunk_size: self.sync.patch_chunk_size,
            candidate_vectorizer_path: self.vectorizer.candidate_path.clone(),
            retriever_vectorizer_path: self.vectorizer.retriever_path.clone(),
            local_index_path: self.index.local_path.clone(),
            remote_index_path: self.index.remote_path.clone(),
        }
    }

    pub fn consolidation_params(&self) -> ConsolidationParams {
        ConsolidationParams {
            threshold: self.similarity.threshold,
            lookback: Duration::seconds(self.consolidation.lookback_secs),
        }
    }
}

/// Strip a `sqlite:` / `sqlite://` scheme so URIs and plain paths both work.
fn store_path(value: &str) -> PathBuf {
    let trimmed = value
        .strip_prefix("sqlite://")
        .or_else(|| value.strip_prefix("sqlite:"))
        .unwrap_or(value);
    PathBuf::from(trimmed)
}

/// Overlay environment overrides. `lookup` returns the value of a variable.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("LOCAL_DB_URI") {
        config.stores.local_path = store_path(&v);
    }
    if let Some(v) = lookup("REMOTE_DB_URI").or_else(|| lookup("POSTGRES_URI")) {
        config.stores.remote_path = store_path(&v);
    }
    if let Some(v) = lookup("STORE_TIMEOUT_SECS") {
        config.stores.timeout_secs = v
            .parse()
            .with_context(|| format!("STORE_TIMEOUT_SECS is not a number: '{}'", v))?;
    }
    if let Some(v) = lookup("HARD_SIM_THRESHOLD") {
        config.similarity.threshold = v
            .parse()
            .with_context(|| format!("HARD_SIM_THRESHOLD is not a number: '{}'", v))?;
    }
    if let Some(v) = lookup("CAND_PATH") {
        config.vectorizer.candidate_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("RTRV_PATH") {
        config.vectorizer.retriever_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("LOCAL_IDX_PATH") {
        config.index.local_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("REMOTE_IDX_PATH") {
        config.index.remote_path = PathBuf::from(v);
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    let threshold = config.similarity.threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        bail!("similarity.threshold must be in (0.0, 1.0], got {}", threshold);
    }
    if config.similarity.candidate_k < 1 {
        bail!("similarity.candidate_k must be >= 1");
    }
    if config.similarity.top_k < 1 {
        bail!("similarity.top_k must be >= 1");
    }
    if config.similarity.top_k > config.similarity.candidate_k {
        bail!(
            "similarity.top_k ({}) must not exceed similarity.candidate_k ({})",
            config.similarity.top_k,
            config.similarity.candidate_k
        );
    }

    if config.vectorizer.candidate_dims == 0 || config.vectorizer.retriever_dims == 0 {
        bail!("vectorizer dimensions must be > 0");
    }

    if config.stores.timeout_secs == 0 {
        bail!("stores.timeout_secs must be > 0");
    }
    if config.stores.max_connections == 0 {
        bail!("stores.max_connections must be > 0");
    }

    if config.sync.patch_chunk_size == 0 {
        bail!("sync.patch_chunk_size must be > 0");
    }
    if config.sync.incremental_lookback_secs <= 0 || config.sync.full_lookback_days <= 0 {
        bail!("sync lookback windows must be > 0");
    }
    if config.consolidation.lookback_secs <= 0 {
        bail!("consolidation.lookback_secs must be > 0");
    }

    if config.schedule.sync_every_secs == 0 || config.schedule.consolidate_every_secs == 0 {
        bail!("schedule cadences must be > 0");
    }
    config.schedule.full_reindex_time()?;

    Ok(())
}

/// Parse a TOML string (no environment overlay).
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.similarity.threshold, 0.8);
        assert_eq!(cfg.similarity.top_k, 1);
        assert_eq!(cfg.vectorizer.candidate_dims, 768);
        assert_eq!(cfg.vectorizer.retriever_dims, 1024);
        assert_eq!(cfg.sync.patch_chunk_size, 1000);
        assert_eq!(cfg.sync.full_lookback_days, 365);
        assert_eq!(cfg.schedule.full_reindex_at, "00:00");
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg = parse_config(
            r#"
            [similarity]
            threshold = 0.9

            [index]
            local_path = "/tmp/local.idx"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.similarity.threshold, 0.9);
        assert_eq!(cfg.similarity.candidate_k, 10);
        assert_eq!(cfg.index.local_path, PathBuf::from("/tmp/local.idx"));
        assert_eq!(cfg.index.remote_path, PathBuf::from("faiss_index_remote.bin"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOCAL_DB_URI", "sqlite:///var/lib/topdup/local.db"),
            ("POSTGRES_URI", "/var/lib/topdup/remote.db"),
            ("HARD_SIM_THRESHOLD", "0.85"),
            ("CAND_PATH", "/models/cand.bin"),
            ("REMOTE_IDX_PATH", "/idx/remote.bin"),
        ]);
        let mut cfg = Config::default();
        apply_env(&mut cfg, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.stores.local_path, PathBuf::from("/var/lib/topdup/local.db"));
        assert_eq!(cfg.stores.remote_path, PathBuf::from("/var/lib/topdup/remote.db"));
        assert_eq!(cfg.similarity.threshold, 0.85);
        assert_eq!(cfg.vectorizer.candidate_path, PathBuf::from("/models/cand.bin"));
        assert_eq!(cfg.index.remote_path, PathBuf::from("/idx/remote.bin"));
    }

    #[test]
    fn test_remote_db_uri_wins_over_alias() {
        let env: HashMap<&str, &str> =
            HashMap::from([("REMOTE_DB_URI", "a.db"), ("POSTGRES_URI", "b.db")]);
        let mut cfg = Config::default();
        apply_env(&mut cfg, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.stores.remote_path, PathBuf::from("a.db"));
    }

    #[test]
    fn test_bad_env_number_rejected() {
        let mut cfg = Config::default();
        let err = apply_env(&mut cfg, |k| {
            (k == "HARD_SIM_THRESHOLD").then(|| "high".to_string())
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.similarity.threshold = 0.0;
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.similarity.top_k = 11;
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.schedule.full_reindex_at = "25:99".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.sync.patch_chunk_size = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.schedule.sync_every_secs, 60);
    }

    #[test]
    fn test_params_conversion() {
        let cfg = Config::default();
        let sync = cfg.sync_params();
        assert_eq!(sync.incremental_lookback, Duration::minutes(3));
        assert_eq!(sync.full_lookback, Duration::days(365));
        assert_eq!(cfg.consolidation_params().lookback, Duration::minutes(3));
        assert_eq!(cfg.retrieval_params().candidate_k, 10);
    }
}
