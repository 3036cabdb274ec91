//! # revdata Storage
//!
//! Persistence for the import pipeline:
//!
//! - [`RecordStore`] / [`JobStore`]: datasets, items and import jobs, backed
//!   by LMDB ([`LmdbStore`]) or memory ([`MemoryStore`])
//! - [`IndexStore`]: dedup index artifacts keyed by dataset and strategy
//! - [`UploadSpool`]: chunked on-disk staging of uploads
//!
//! [`StorageManager`] opens all of them from a single data directory.

pub mod index_store;
pub mod lmdb_storage;
pub mod manager;
pub mod memory;
pub mod spool;
pub mod store;

pub use index_store::{FsIndexStore, IndexStore, MemoryIndexStore};
pub use lmdb_storage::LmdbStore;
pub use manager::StorageManager;
pub use memory::MemoryStore;
pub use spool::{SpoolWriter, SpooledUpload, UploadSpool, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_UPLOAD_SIZE};
pub use store::{JobStore, RecordStore};
