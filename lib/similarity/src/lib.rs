//! # revdata Similarity
//!
//! Near-duplicate detection for dataset imports.
//!
//! Two strategies share the [`Deduplicator`] trait:
//!
//! - [`TextDeduplicator`]: 3-character shingles compared by Jaccard
//!   similarity, scored in parallel with rayon
//! - [`EmbeddingDeduplicator`]: L2-normalized embeddings from an
//!   [`EmbeddingProvider`] compared by inner product in an exact [`FlatIndex`]
//!
//! [`create_deduplicator`] picks one from a dataset's
//! [`DedupConfig`](revdata_core::DedupConfig).
//!
//! ## Example
//!
//! ```rust
//! use revdata_similarity::{Deduplicator, TextDeduplicator};
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let mut dedup = TextDeduplicator::new();
//! dedup.build_index(&["What is Rust?".to_string()]).await.unwrap();
//! let flags = dedup
//!     .check_duplicates(&["what is rust?".to_string(), "Why LMDB?".to_string()], 0.9)
//!     .await
//!     .unwrap();
//! assert_eq!(flags, vec![true, false]);
//! # });
//! # }
//! ```

pub mod dedup;
pub mod embedding;
pub mod flat;
pub mod query;
pub mod shingle;

pub use dedup::{create_deduplicator, meta_path_for, Deduplicator, IndexArtifacts};
pub use embedding::{
    parse_embedding_response, EmbeddingDeduplicator, EmbeddingProvider, HashingEmbeddingProvider,
    HttpEmbeddingProvider,
};
pub use flat::{meets_threshold, FlatIndex, FlatIndexMeta, SCORE_EPSILON};
pub use query::extract_query_text;
pub use shingle::{jaccard, shingles, ShingleSet, TextDeduplicator};
