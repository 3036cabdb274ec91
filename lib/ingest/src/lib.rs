//! # revdata Ingest
//!
//! Drives uploads into datasets:
//!
//! 1. the upload is already spooled to disk ([`revdata_storage::UploadSpool`])
//! 2. ZIP uploads are unwrapped to their data file
//! 3. records are decoded and normalized on a blocking thread
//! 4. the first records feed field detection
//! 5. appends are deduplicated batch by batch against the dataset's index
//! 6. each batch is written in its own store transaction
//! 7. the dataset is finalized and the dedup index saved
//!
//! A failure anywhere rolls the dataset back: a new dataset is removed, an
//! append loses the items it added.
//!
//! Jobs are durable. [`IngestService`] records each job before queueing it
//! and [`IngestService::recover`] picks up whatever was unfinished when the
//! process last stopped. At most one job runs per dataset ([`DatasetLocks`]).

pub mod importer;
pub mod locks;
pub mod queue;
pub mod recovery;
pub mod service;

pub use importer::{ImportSettings, Importer, DEFAULT_BATCH_SIZE, DEFAULT_MAX_EXTRACTED_SIZE};
pub use locks::{DatasetGuard, DatasetLocks};
pub use queue::{JobQueue, QueueStats, QueuedJob};
pub use recovery::{recover_jobs, RecoveryReport};
pub use service::IngestService;
