//! # revdata
//!
//! Dataset ingestion and deduplication for corpus review.
//!
//! revdata takes uploaded corpora (JSONL, JSON, CSV, TSV, or any of those in
//! a ZIP), turns every row into a reviewable item, and on re-imports drops
//! rows that are already in the dataset.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! revdata serve --http-port 8000
//! curl -F name=faq -F file=@faq.jsonl http://localhost:8000/datasets/upload
//! ```
//!
//! ### From the Command Line
//!
//! ```bash
//! revdata import faq.jsonl --name faq
//! revdata import more.jsonl --append 1
//! revdata preview faq.jsonl
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use revdata::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let storage = StorageManager::open("./data", 100 * 1024 * 1024, 1024 * 1024)?;
//! let service = IngestService::start(Importer::new(storage, ImportSettings::default()), 2, 64);
//!
//! let upload = service
//!     .storage()
//!     .spool
//!     .spool_reader("faq.jsonl", std::fs::File::open("faq.jsonl")?)?;
//! let dataset = service
//!     .import_now(upload, NewDataset { name: "faq".into(), ..Default::default() })
//!     .await?;
//! println!("{} items", dataset.item_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - `revdata-core` - records, datasets, jobs, decoders, normalization, errors
//! - `revdata-schema` - field detection and item classification
//! - `revdata-similarity` - shingle and embedding deduplicators
//! - `revdata-storage` - LMDB stores, index files, upload spool
//! - `revdata-ingest` - import pipeline, job queue, recovery
//! - `revdata-api` - REST API

pub mod config;

// Re-export core types
pub use revdata_core::{
    AppendTally, DataFormat, Dataset, DatasetId, DatasetItem, DatasetStatus, DedupConfig, DedupStrategy,
    DisplayMode, Error, FieldMapping, ImportJob, JobStatus, NewDataset, Result,
};

pub use revdata_schema::{detect, PreviewReport};
pub use revdata_similarity::{create_deduplicator, Deduplicator, EmbeddingProvider};
pub use revdata_storage::{SpooledUpload, StorageManager};
pub use revdata_ingest::{ImportSettings, Importer, IngestService};
pub use revdata_api::RestApi;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AppendTally, DataFormat, Dataset, DedupConfig, Error, FieldMapping, ImportSettings, Importer,
        IngestService, NewDataset, Result, StorageManager,
    };
}
