//! Embedding deduplicator and the providers that feed it.
//!
//! Texts are embedded in batches of `batch_size` with at most `concurrency`
//! requests in flight; results come back in input order. Every vector is
//! L2-normalized so the inner product of two vectors is their cosine
//! similarity.

use ahash::RandomState;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use revdata_core::{validate_threshold, DedupStrategy, Error, Result, Vector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::dedup::{Deduplicator, IndexArtifacts};
use crate::flat::{meets_threshold, FlatIndex, FlatIndexMeta};
use crate::shingle::canonicalize;

/// Request timeout for the embedding endpoint
pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Turns texts into vectors, one per input, in input order
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    OpenAi { data: Vec<EmbeddingData> },
    Plain { embeddings: Vec<Vec<f32>> },
}

/// Accepts `{"data": [{"embedding": [...]}, ...]}` or `{"embeddings": [[...], ...]}`
pub fn parse_embedding_response(body: Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let keys: Vec<String> = body
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    let parsed: EmbeddingResponse = serde_json::from_value(body)
        .map_err(|_| Error::EmbeddingFormat(format!("unexpected response keys {:?}", keys)))?;
    let vectors = match parsed {
        EmbeddingResponse::OpenAi { data } => data.into_iter().map(|d| d.embedding).collect::<Vec<_>>(),
        EmbeddingResponse::Plain { embeddings } => embeddings,
    };
    if vectors.len() != expected {
        return Err(Error::EmbeddingFormat(format!(
            "requested {} embeddings, received {}",
            expected,
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// OpenAI-compatible embedding endpoint
pub struct HttpEmbeddingProvider {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(url: String, api_key: Option<String>, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            api_key: api_key.filter(|k| !k.is_empty()),
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::EmbeddingApi(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(Error::EmbeddingApi(format!("HTTP {}: {}", status, excerpt)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFormat(format!("response is not JSON: {}", e)))?;
        parse_embedding_response(body, texts.len())
    }
}

/// Deterministic offline provider: hashed character trigrams and words
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dim: usize,
    hasher: RandomState,
}

impl HashingEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            hasher: RandomState::with_seeds(0x5eed, 0xda7a, 0x1d, 0xed),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let canonical = canonicalize(text);
        let chars: Vec<char> = canonical.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[(self.hasher.hash_one(&trigram) as usize) % self.dim] += 1.0;
        }
        for word in canonical.split(' ').filter(|w| !w.is_empty()) {
            vector[(self.hasher.hash_one(word) as usize) % self.dim] += 2.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Inner-product deduplicator over a [`FlatIndex`]
pub struct EmbeddingDeduplicator {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
    index: FlatIndex,
    /// Vectors fetched by a check, reused when the same texts are added
    cache: HashMap<String, Vector, RandomState>,
}

impl EmbeddingDeduplicator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            index: FlatIndex::new(),
            cache: HashMap::default(),
        }
    }

    #[inline]
    pub fn dim(&self) -> Option<usize> {
        self.index.dim()
    }

    /// Embed and normalize, preserving input order
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        debug!(texts = texts.len(), batches = batches.len(), "Requesting embeddings");

        let raw: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().map(|batch| {
            let provider = Arc::clone(&self.provider);
            async move {
                let out = provider.embed(&batch).await?;
                if out.len() != batch.len() {
                    return Err(Error::EmbeddingFormat(format!(
                        "requested {} embeddings, received {}",
                        batch.len(),
                        out.len()
                    )));
                }
                Ok(out)
            }
        }))
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        let vectors: Vec<Vector> = raw.into_iter().flatten().map(|v| Vector::new(v).normalized()).collect();
        let expected = self.index.dim().or_else(|| vectors.first().map(Vector::dim));
        if let Some(expected) = expected {
            if let Some(bad) = vectors.iter().find(|v| v.dim() != expected) {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: bad.dim(),
                });
            }
        }
        Ok(vectors)
    }

    /// Vectors for `texts`, embedding only those not cached yet
    async fn vectors_for(&mut self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut missing: Vec<String> = Vec::new();
        for text in texts {
            if !self.cache.contains_key(text) && !missing.contains(text) {
                missing.push(text.clone());
            }
        }
        let fetched = self.embed_all(&missing).await?;
        self.cache.extend(missing.into_iter().zip(fetched));

        texts
            .iter()
            .map(|t| {
                self.cache
                    .get(t)
                    .cloned()
                    .ok_or_else(|| Error::EmbeddingFormat("embedding missing for text".into()))
            })
            .collect()
    }
}

#[async_trait]
impl Deduplicator for EmbeddingDeduplicator {
    fn strategy(&self) -> DedupStrategy {
        DedupStrategy::Embedding
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    async fn build_index(&mut self, existing_texts: &[String]) -> Result<()> {
        self.cache.clear();
        self.index = FlatIndex::new();
        let vectors = self.embed_all(existing_texts).await?;
        for v in &vectors {
            self.index.add(v)?;
        }
        Ok(())
    }

    async fn check_duplicates(&mut self, new_texts: &[String], threshold: f32) -> Result<Vec<bool>> {
        validate_threshold(threshold)?;
        if new_texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.index.is_empty() {
            return Ok(vec![false; new_texts.len()]);
        }
        let vectors = self.vectors_for(new_texts).await?;
        if let Some(v) = vectors.first() {
            self.index.check_dim(v.dim())?;
        }
        Ok(self
            .index
            .best_scores(&vectors)
            .into_iter()
            .map(|s| s.is_some_and(|s| meets_threshold(s, threshold)))
            .collect())
    }

    async fn mark_repeats(&mut self, texts: &[String], threshold: f32) -> Result<Vec<bool>> {
        validate_threshold(threshold)?;
        let vectors = self.vectors_for(texts).await?;
        let mut accepted: Vec<&Vector> = Vec::new();
        let mut flags = Vec::with_capacity(vectors.len());
        for v in &vectors {
            let repeat = accepted.iter().any(|a| meets_threshold(a.dot(v), threshold));
            if !repeat {
                accepted.push(v);
            }
            flags.push(repeat);
        }
        Ok(flags)
    }

    async fn add_to_index(&mut self, texts: &[String]) -> Result<()> {
        let vectors = self.vectors_for(texts).await?;
        if let Some(v) = vectors.first() {
            self.index.check_dim(v.dim())?;
        }
        for v in &vectors {
            self.index.add(v)?;
        }
        self.cache.clear();
        Ok(())
    }

    fn export_artifacts(&self) -> Result<IndexArtifacts> {
        let meta = serde_json::to_vec(&self.index.meta())?;
        Ok(IndexArtifacts {
            index: self.index.to_bytes(),
            meta: Some(meta),
        })
    }

    fn import_artifacts(&mut self, artifacts: &IndexArtifacts) -> Result<()> {
        let meta_bytes = artifacts
            .meta
            .as_ref()
            .ok_or_else(|| Error::IndexCorruption("vector index metadata is missing".into()))?;
        let meta: FlatIndexMeta = serde_json::from_slice(meta_bytes)
            .map_err(|e| Error::IndexCorruption(format!("vector index metadata: {}", e)))?;
        self.index = FlatIndex::from_bytes(&artifacts.index, meta)?;
        self.cache.clear();
        Ok(())
    }
}
