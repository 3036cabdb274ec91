//! Exact inner-product index over contiguous `f32` storage

use rayon::prelude::*;
use revdata_core::simd::dot_product_simd;
use revdata_core::{Error, Result, Vector};
use serde::{Deserialize, Serialize};

/// Rounding slack for inner products of unit vectors
pub const SCORE_EPSILON: f32 = 1e-5;

/// Whether an inner product of unit vectors reaches `threshold`.
///
/// Scores are clamped to `[-1, 1]`; a text scored against itself counts at
/// any threshold up to 1.0.
#[inline]
#[must_use]
pub fn meets_threshold(score: f32, threshold: f32) -> bool {
    score.clamp(-1.0, 1.0) + SCORE_EPSILON >= threshold
}

/// Metadata persisted next to the raw vector bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatIndexMeta {
    pub dimension: usize,
    pub count: usize,
}

/// Brute-force index; the dimension is fixed by the first insert
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dim: Option<usize>,
    /// `dim * len()` values, row-major
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self.dim {
            Some(d) if d > 0 => self.vectors.len() / d,
            _ => 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_dim(&self, actual: usize) -> Result<()> {
        match self.dim {
            Some(expected) if expected != actual => Err(Error::DimensionMismatch { expected, actual }),
            _ => Ok(()),
        }
    }

    pub fn add(&mut self, vector: &Vector) -> Result<()> {
        self.check_dim(vector.dim())?;
        if vector.is_empty() {
            return Err(Error::EmbeddingFormat("empty embedding vector".into()));
        }
        self.dim.get_or_insert(vector.dim());
        self.vectors.extend_from_slice(vector.as_slice());
        Ok(())
    }

    fn row(&self, idx: usize, dim: usize) -> &[f32] {
        &self.vectors[idx * dim..(idx + 1) * dim]
    }

    /// Highest inner product against any stored vector, `None` when empty
    pub fn best_score(&self, query: &[f32]) -> Option<f32> {
        let dim = self.dim?;
        if query.len() != dim {
            return None;
        }
        (0..self.len())
            .map(|i| dot_product_simd(self.row(i, dim), query))
            .reduce(f32::max)
    }

    /// [`best_score`](Self::best_score) for many queries in parallel
    pub fn best_scores(&self, queries: &[Vector]) -> Vec<Option<f32>> {
        queries.par_iter().map(|q| self.best_score(q.as_slice())).collect()
    }

    pub fn meta(&self) -> FlatIndexMeta {
        FlatIndexMeta {
            dimension: self.dim.unwrap_or(0),
            count: self.len(),
        }
    }

    /// Little-endian `f32` bytes of every stored vector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.vectors.len() * 4);
        for v in &self.vectors {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    /// Rebuild from [`to_bytes`](Self::to_bytes) output and its metadata
    pub fn from_bytes(bytes: &[u8], meta: FlatIndexMeta) -> Result<Self> {
        let expected = meta
            .dimension
            .checked_mul(meta.count)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::IndexCorruption("vector index metadata overflows".into()))?;
        if bytes.len() != expected {
            return Err(Error::IndexCorruption(format!(
                "expected {} bytes for {} x {} vectors, found {}",
                expected,
                meta.count,
                meta.dimension,
                bytes.len()
            )));
        }
        if meta.count > 0 && meta.dimension == 0 {
            return Err(Error::IndexCorruption("zero dimension with stored vectors".into()));
        }
        let vectors = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            dim: (meta.dimension > 0).then_some(meta.dimension),
            vectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(data: &[f32]) -> Vector {
        Vector::from_slice(data).normalized()
    }

    #[test]
    fn test_best_score() {
        let mut index = FlatIndex::new();
        assert_eq!(index.best_score(&[1.0, 0.0]), None);
        index.add(&unit(&[1.0, 0.0])).unwrap();
        index.add(&unit(&[0.0, 1.0])).unwrap();
        let score = index.best_score(unit(&[1.0, 0.1]).as_slice()).unwrap();
        assert!(score > 0.99);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_meets_threshold_tolerates_rounding() {
        assert!(meets_threshold(0.999_999_9, 1.0));
        assert!(meets_threshold(1.000_000_1, 1.0));
        assert!(!meets_threshold(0.98, 1.0));
        assert!(!meets_threshold(0.79, 0.8));
        assert!(meets_threshold(0.8, 0.8));
    }

    #[test]
    fn test_dimension_fixed_at_first_insert() {
        let mut index = FlatIndex::new();
        index.add(&unit(&[1.0, 0.0, 0.0])).unwrap();
        let err = index.add(&unit(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_bytes_roundtrip_and_corruption() {
        let mut index = FlatIndex::new();
        index.add(&unit(&[0.6, 0.8])).unwrap();
        index.add(&unit(&[1.0, 0.0])).unwrap();
        let bytes = index.to_bytes();
        let meta = index.meta();
        assert_eq!(meta, FlatIndexMeta { dimension: 2, count: 2 });

        let restored = FlatIndex::from_bytes(&bytes, meta).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.best_score(&[0.6, 0.8]), index.best_score(&[0.6, 0.8]));

        let short = FlatIndex::from_bytes(&bytes[..bytes.len() - 4], meta).unwrap_err();
        assert!(matches!(short, Error::IndexCorruption(_)));
    }
}
