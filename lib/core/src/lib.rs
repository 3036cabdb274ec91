//! # revdata Core
//!
//! Shared types and the record-level building blocks of the import pipeline:
//!
//! - [`DataFormat`] and the streaming decoders in [`decode`]
//! - ZIP unwrapping in [`archive`]
//! - [`normalize`] for keys and string values
//! - [`Dataset`], [`DatasetItem`], [`ImportJob`] and their enums
//! - [`FieldMapping`] and [`DedupConfig`]
//! - [`Vector`] with SIMD inner products
//!
//! ## Example
//!
//! ```rust
//! use revdata_core::{decode::decode_reader, normalize::normalize, DataFormat};
//! use std::io::Cursor;
//!
//! let input = Cursor::new(b"{\"\xEF\xBB\xBFquestion\": \" hi \"}\n".to_vec());
//! let records: Vec<_> = decode_reader(input, DataFormat::Jsonl)
//!     .unwrap()
//!     .map(|r| normalize(&r.unwrap()))
//!     .collect();
//! assert_eq!(records[0]["question"], "hi");
//! ```

pub mod archive;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod format;
pub mod job;
pub mod mapping;
pub mod normalize;
pub mod vector;

/// SIMD inner products
///
/// - AVX2/FMA on x86_64
/// - NEON on ARM64/Apple Silicon
pub mod simd;

pub use config::{validate_threshold, DedupConfig, DedupStrategy};
pub use dataset::{Dataset, DatasetId, DatasetItem, DatasetStatus, ItemStatus, ItemType, NewDataset, Record};
pub use error::{Error, Result};
pub use format::DataFormat;
pub use job::{AppendTally, ImportJob, JobKind, JobStatus};
pub use mapping::{DisplayMode, FieldMapping};
pub use vector::Vector;
