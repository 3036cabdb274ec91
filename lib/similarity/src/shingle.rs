//! Character-shingle Jaccard deduplicator.

use async_trait::async_trait;
use rayon::prelude::*;
use revdata_core::{validate_threshold, DedupStrategy, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::dedup::{Deduplicator, IndexArtifacts};

/// Shingle width in characters
pub const SHINGLE_SIZE: usize = 3;

pub type ShingleSet = HashSet<String, ahash::RandomState>;

/// Lowercase, collapse whitespace runs to one space, trim
pub fn canonicalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 3-character shingles of the canonical text.
///
/// Texts shorter than a shingle become a one-element set of the whole text.
pub fn shingles(text: &str) -> ShingleSet {
    let canonical = canonicalize(text);
    let chars: Vec<char> = canonical.chars().collect();
    let mut set = ShingleSet::default();
    if chars.len() < SHINGLE_SIZE {
        set.insert(canonical);
        return set;
    }
    set.extend(chars.windows(SHINGLE_SIZE).map(|w| w.iter().collect::<String>()));
    set
}

/// |A ∩ B| / |A ∪ B|, 0.0 when either side is empty
pub fn jaccard(a: &ShingleSet, b: &ShingleSet) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|s| large.contains(*s)).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

#[derive(Serialize, Deserialize)]
struct TextIndexFile {
    texts: Vec<String>,
    shingles: Vec<ShingleSet>,
}

/// Keeps every indexed text next to its shingle set
#[derive(Debug, Default)]
pub struct TextDeduplicator {
    texts: Vec<String>,
    shingles: Vec<ShingleSet>,
}

impl TextDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_indexed_duplicate(&self, candidate: &ShingleSet, threshold: f32) -> bool {
        self.shingles.iter().any(|s| jaccard(candidate, s) >= threshold)
    }
}

#[async_trait]
impl Deduplicator for TextDeduplicator {
    fn strategy(&self) -> DedupStrategy {
        DedupStrategy::Jaccard
    }

    fn len(&self) -> usize {
        self.texts.len()
    }

    async fn build_index(&mut self, existing_texts: &[String]) -> Result<()> {
        self.shingles = existing_texts.par_iter().map(|t| shingles(t)).collect();
        self.texts = existing_texts.to_vec();
        Ok(())
    }

    async fn check_duplicates(&mut self, new_texts: &[String], threshold: f32) -> Result<Vec<bool>> {
        validate_threshold(threshold)?;
        if self.shingles.is_empty() {
            return Ok(vec![false; new_texts.len()]);
        }
        let this = &*self;
        Ok(new_texts
            .par_iter()
            .map(|t| this.is_indexed_duplicate(&shingles(t), threshold))
            .collect())
    }

    async fn mark_repeats(&mut self, texts: &[String], threshold: f32) -> Result<Vec<bool>> {
        validate_threshold(threshold)?;
        let sets: Vec<ShingleSet> = texts.par_iter().map(|t| shingles(t)).collect();
        let mut accepted: Vec<&ShingleSet> = Vec::new();
        let mut flags = Vec::with_capacity(sets.len());
        for set in &sets {
            let repeat = accepted.iter().any(|a| jaccard(set, a) >= threshold);
            if !repeat {
                accepted.push(set);
            }
            flags.push(repeat);
        }
        Ok(flags)
    }

    async fn add_to_index(&mut self, texts: &[String]) -> Result<()> {
        let new_sets: Vec<ShingleSet> = texts.par_iter().map(|t| shingles(t)).collect();
        self.shingles.extend(new_sets);
        self.texts.extend_from_slice(texts);
        Ok(())
    }

    fn export_artifacts(&self) -> Result<IndexArtifacts> {
        let file = TextIndexFile {
            texts: self.texts.clone(),
            shingles: self.shingles.clone(),
        };
        let index = bincode::serialize(&file).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(IndexArtifacts { index, meta: None })
    }

    fn import_artifacts(&mut self, artifacts: &IndexArtifacts) -> Result<()> {
        let file: TextIndexFile = bincode::deserialize(&artifacts.index)
            .map_err(|e| Error::IndexCorruption(format!("text index: {}", e)))?;
        if file.texts.len() != file.shingles.len() {
            return Err(Error::IndexCorruption(format!(
                "text index holds {} texts but {} shingle sets",
                file.texts.len(),
                file.shingles.len()
            )));
        }
        self.texts = file.texts;
        self.shingles = file.shingles;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shingles() {
        let s = shingles("  ABcd ");
        assert_eq!(s.len(), 2);
        assert!(s.contains("abc") && s.contains("bcd"));
        assert_eq!(shingles("Hi"), ShingleSet::from_iter(["hi".to_string()]));
        assert_eq!(shingles("a \t\n b"), shingles("A B"));
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&shingles("hello world"), &shingles("HELLO   world")), 1.0);
        let half = jaccard(&shingles("abcd"), &shingles("abce"));
        // {abc, bcd} vs {abc, bce}
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(jaccard(&ShingleSet::default(), &shingles("abc")), 0.0);
    }

    #[test]
    fn test_jaccard_symmetric_and_reflexive() {
        let short = shingles("borrow checker");
        let long = shingles("the borrow checker rejects aliasing mutable references");
        assert_ne!(short.len(), long.len());
        assert_eq!(jaccard(&short, &long), jaccard(&long, &short));
        assert!(jaccard(&short, &long) > 0.0);

        let set = shingles("Lifetimes tie references to scopes");
        assert_eq!(jaccard(&set, &set), 1.0);
    }

    #[tokio::test]
    async fn test_check_against_index_only() {
        let mut dedup = TextDeduplicator::new();
        dedup.build_index(&strings(&["What is Rust?"])).await.unwrap();
        let flags = dedup
            .check_duplicates(&strings(&["what is rust?", "How do lifetimes work?", "How do lifetimes work?"]), 0.9)
            .await
            .unwrap();
        // Repeats inside the batch are not flagged here
        assert_eq!(flags, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_empty_index_has_no_duplicates() {
        let mut dedup = TextDeduplicator::new();
        let flags = dedup.check_duplicates(&strings(&["a", "b"]), 0.5).await.unwrap();
        assert_eq!(flags, vec![false, false]);
    }

    #[tokio::test]
    async fn test_mark_repeats() {
        let mut dedup = TextDeduplicator::new();
        let flags = dedup
            .mark_repeats(&strings(&["Q1 text here", "Q2 other", "q1 TEXT here", "Q2 other"]), 0.9)
            .await
            .unwrap();
        assert_eq!(flags, vec![false, false, true, true]);
    }

    #[tokio::test]
    async fn test_invalid_threshold() {
        let mut dedup = TextDeduplicator::new();
        let err = dedup.check_duplicates(&strings(&["x"]), 1.2).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup_index").join("dataset_1.jaccard.bin");

        let mut dedup = TextDeduplicator::new();
        dedup.build_index(&strings(&["first entry", "second entry"])).await.unwrap();
        dedup.add_to_index(&strings(&["third entry"])).await.unwrap();
        dedup.save_index(&path).unwrap();

        let mut restored = TextDeduplicator::new();
        assert!(restored.load_index(&path));
        assert_eq!(restored.len(), 3);

        let queries = strings(&["THIRD entry", "unrelated"]);
        let a = dedup.check_duplicates(&queries, 0.8).await.unwrap();
        let b = restored.check_duplicates(&queries, 0.8).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(b, vec![true, false]);
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut dedup = TextDeduplicator::new();
        assert!(!dedup.load_index(&dir.path().join("absent.bin")));

        let path = dir.path().join("broken.bin");
        std::fs::write(&path, b"\x01\x02garbage").unwrap();
        assert!(!dedup.load_index(&path));
        assert!(dedup.is_empty());
    }
}
