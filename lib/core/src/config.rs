use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which deduplicator backs a dataset's index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Character-shingle Jaccard similarity
    Jaccard,
    /// Embedding inner product
    Embedding,
}

impl DedupStrategy {
    /// Stable tag used in artifact names
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            DedupStrategy::Jaccard => "jaccard",
            DedupStrategy::Embedding => "vectors",
        }
    }
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn default_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_concurrency() -> usize {
    1
}

fn default_threshold() -> f32 {
    0.8
}

fn default_query_field() -> String {
    "question".to_string()
}

fn default_true() -> bool {
    true
}

/// Per-dataset deduplication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub use_embedding: bool,
    #[serde(default)]
    pub embedding_api_url: Option<String>,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    #[serde(default = "default_model")]
    pub embedding_model: String,
    #[serde(default = "default_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_query_field")]
    pub query_field: String,
    /// Also drop records that repeat an earlier record of the same upload
    #[serde(default = "default_true")]
    pub dedup_within_import: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_embedding: false,
            embedding_api_url: None,
            embedding_api_key: None,
            embedding_model: default_model(),
            embedding_batch_size: default_batch_size(),
            embedding_concurrency: default_concurrency(),
            similarity_threshold: default_threshold(),
            query_field: default_query_field(),
            dedup_within_import: true,
        }
    }
}

impl DedupConfig {
    /// Embedding is chosen only when requested and an endpoint is configured
    pub fn strategy(&self) -> DedupStrategy {
        let has_url = self
            .embedding_api_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if self.use_embedding && has_url {
            DedupStrategy::Embedding
        } else {
            DedupStrategy::Jaccard
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.similarity_threshold)?;
        if self.embedding_batch_size == 0 {
            return Err(Error::InvalidConfig("embedding_batch_size must be at least 1".into()));
        }
        if self.embedding_concurrency == 0 {
            return Err(Error::InvalidConfig("embedding_concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

/// Thresholds live in (0, 1]
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "similarity threshold must be in (0, 1], got {}",
            threshold
        )))
    }
}
