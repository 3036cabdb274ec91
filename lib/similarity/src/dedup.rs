//! The deduplicator abstraction shared by both strategies

use async_trait::async_trait;
use revdata_core::{DedupConfig, DedupStrategy, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::embedding::{EmbeddingDeduplicator, EmbeddingProvider, HttpEmbeddingProvider};
use crate::shingle::TextDeduplicator;

/// Serialized form of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexArtifacts {
    /// Main payload
    pub index: Vec<u8>,
    /// Sidecar metadata, for strategies that need one
    pub meta: Option<Vec<u8>>,
}

/// Sidecar file next to an index file: `x.vectors.bin` → `x.vectors.meta.json`
pub fn meta_path_for(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

/// Near-duplicate detector over a growing set of texts.
///
/// An index belongs to exactly one dataset. `check_duplicates` compares
/// incoming texts against the index only; batch members are never compared
/// with each other there (use `mark_repeats` for that).
#[async_trait]
pub trait Deduplicator: Send + Sync {
    fn strategy(&self) -> DedupStrategy;

    /// Number of indexed texts
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the index with `existing_texts`
    async fn build_index(&mut self, existing_texts: &[String]) -> Result<()>;

    /// One flag per text, `true` when it duplicates an indexed entry
    async fn check_duplicates(&mut self, new_texts: &[String], threshold: f32) -> Result<Vec<bool>>;

    /// One flag per text, `true` when it duplicates an earlier non-flagged
    /// text of the same slice
    async fn mark_repeats(&mut self, texts: &[String], threshold: f32) -> Result<Vec<bool>>;

    /// Append accepted texts
    async fn add_to_index(&mut self, texts: &[String]) -> Result<()>;

    fn export_artifacts(&self) -> Result<IndexArtifacts>;

    /// Replace the index with previously exported artifacts
    fn import_artifacts(&mut self, artifacts: &IndexArtifacts) -> Result<()>;

    fn save_index(&self, path: &Path) -> Result<()> {
        let artifacts = self.export_artifacts()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &artifacts.index)?;
        if let Some(meta) = &artifacts.meta {
            std::fs::write(meta_path_for(path), meta)?;
        }
        Ok(())
    }

    /// Restore from `path`; a missing or unreadable index yields `false`
    fn load_index(&mut self, path: &Path) -> bool {
        let Ok(index) = std::fs::read(path) else {
            return false;
        };
        let meta = std::fs::read(meta_path_for(path)).ok();
        match self.import_artifacts(&IndexArtifacts { index, meta }) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable dedup index");
                false
            }
        }
    }
}

/// Build the deduplicator a dataset's config asks for.
///
/// `provider` overrides the HTTP embedding client.
pub fn create_deduplicator(
    config: &DedupConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Box<dyn Deduplicator>> {
    config.validate()?;
    match config.strategy() {
        DedupStrategy::Jaccard => Ok(Box::new(TextDeduplicator::new())),
        DedupStrategy::Embedding => {
            let provider = match provider {
                Some(p) => p,
                None => {
                    let url = config
                        .embedding_api_url
                        .clone()
                        .ok_or_else(|| Error::InvalidConfig("embedding_api_url is required".into()))?;
                    Arc::new(HttpEmbeddingProvider::new(
                        url,
                        config.embedding_api_key.clone(),
                        config.embedding_model.clone(),
                    )?)
                }
            };
            Ok(Box::new(EmbeddingDeduplicator::new(
                provider,
                config.embedding_batch_size,
                config.embedding_concurrency,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingProvider;

    #[test]
    fn test_meta_path() {
        let p = Path::new("/data/dedup_index/dataset_4.vectors.bin");
        assert_eq!(meta_path_for(p), Path::new("/data/dedup_index/dataset_4.vectors.meta.json"));
    }

    #[test]
    fn test_factory_selects_strategy() {
        let config = DedupConfig::default();
        assert_eq!(create_deduplicator(&config, None).unwrap().strategy(), DedupStrategy::Jaccard);

        // use_embedding without a URL falls back to text similarity
        let config = DedupConfig {
            use_embedding: true,
            ..Default::default()
        };
        assert_eq!(create_deduplicator(&config, None).unwrap().strategy(), DedupStrategy::Jaccard);

        let config = DedupConfig {
            use_embedding: true,
            embedding_api_url: Some("http://127.0.0.1:9/embeddings".into()),
            ..Default::default()
        };
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::new(32));
        let dedup = create_deduplicator(&config, Some(provider)).unwrap();
        assert_eq!(dedup.strategy(), DedupStrategy::Embedding);
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_factory_rejects_bad_threshold() {
        let config = DedupConfig {
            similarity_threshold: 0.0,
            ..Default::default()
        };
        assert!(matches!(create_deduplicator(&config, None), Err(Error::InvalidConfig(_))));
    }
}
