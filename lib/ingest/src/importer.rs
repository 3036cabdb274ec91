//! The import pipeline run for one job.
//!
//! Decoding happens on a blocking thread that hands normalized batches to
//! the async side over a bounded channel, so at most a couple of batches are
//! in memory at once. Each batch is deduplicated (append imports only) and
//! written in its own store transaction. Any failure rolls the dataset back
//! to where the job found it.

use revdata_core::archive::resolve_source;
use revdata_core::decode::{decode_file, estimate_count, preview_file, RecordIter, DEFAULT_PREVIEW_LIMIT};
use revdata_core::normalize::normalize_in_place;
use revdata_core::{
    AppendTally, DataFormat, Dataset, DatasetItem, DatasetStatus, Error, FieldMapping, ImportJob, JobKind,
    JobStatus, Record, Result,
};
use revdata_schema::{classify_item, detect, PreviewReport, DEFAULT_SAMPLE_SIZE};
use revdata_similarity::{create_deduplicator, extract_query_text, Deduplicator, EmbeddingProvider};
use revdata_storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Batches buffered between the decoder thread and the writer
const DECODE_CHANNEL_DEPTH: usize = 2;

/// Records persisted per store transaction
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// 1 GiB
pub const DEFAULT_MAX_EXTRACTED_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSettings {
    pub batch_size: usize,
    /// Cap on the data file unpacked from a ZIP upload
    pub max_extracted_size: u64,
    pub preview_limit: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }
}

/// Run blocking store or file work off the async executor
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
}

/// Unwrap archives and open the record stream
fn open_records(path: &Path, format: DataFormat, work_dir: &Path, max_extracted: u64) -> Result<RecordIter> {
    let (source, format) = resolve_source(path, format, work_dir, max_extracted)?;
    decode_file(&source, format)
}

/// Executes import jobs against a [`StorageManager`]
#[derive(Clone)]
pub struct Importer {
    storage: StorageManager,
    settings: ImportSettings,
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl Importer {
    pub fn new(storage: StorageManager, settings: ImportSettings) -> Self {
        Self {
            storage,
            settings,
            provider: None,
        }
    }

    /// Use `provider` instead of the HTTP client named in each dataset's config
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[inline]
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    #[inline]
    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    async fn put_job(&self, job: &ImportJob) -> Result<()> {
        let jobs = self.storage.jobs.clone();
        let job = job.clone();
        blocking(move || jobs.put_job(&job)).await
    }

    /// Run a job to completion, recording the outcome on the job record.
    ///
    /// The spool file and the job's scratch directory are removed whatever
    /// the outcome.
    pub async fn process(&self, mut job: ImportJob) -> Result<AppendTally> {
        job.set_status(JobStatus::Running);
        self.put_job(&job).await?;
        info!(job_id = %job.id, dataset_id = job.dataset_id, kind = ?job.kind, file = %job.filename, "Import started");

        let result = self.execute(&job).await;
        match &result {
            Ok(tally) => {
                info!(
                    job_id = %job.id,
                    dataset_id = job.dataset_id,
                    total_in_file = tally.total_in_file,
                    appended = tally.appended,
                    skipped_duplicates = tally.skipped_duplicates,
                    "Import finished"
                );
                job.succeed(*tally);
            }
            Err(e) => {
                error!(job_id = %job.id, dataset_id = job.dataset_id, error = %e, "Import failed");
                if let Err(rollback) = self.rollback(&job).await {
                    error!(job_id = %job.id, error = %rollback, "Rollback failed");
                }
                job.fail(e);
            }
        }

        if let Err(e) = self.put_job(&job).await {
            warn!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
        self.storage.spool.discard(&job.spool_path, Some(&job.id));
        result
    }

    async fn execute(&self, job: &ImportJob) -> Result<AppendTally> {
        let records = self.storage.records.clone();
        let dataset_id = job.dataset_id;
        let mut dataset = {
            let records = records.clone();
            blocking(move || records.get_dataset(dataset_id)).await?
        };

        let config = dataset.dedup_config.clone();
        let mut dedup = match job.kind {
            JobKind::Append if config.enabled => Some(self.prepare_index(&dataset).await?),
            _ => None,
        };

        let (mut batches, decoder) = self.spawn_decoder(job);
        let mut sample: Vec<Record> = Vec::with_capacity(DEFAULT_SAMPLE_SIZE);
        let mut tally = AppendTally::default();
        let mut next_seq = job.base_next_seq;

        while let Some(batch) = batches.recv().await {
            let mut batch = batch?;
            tally.total_in_file += batch.len() as u64;
            let wanted = DEFAULT_SAMPLE_SIZE.saturating_sub(sample.len());
            sample.extend(batch.iter().take(wanted).cloned());

            if let Some(dedup) = dedup.as_mut() {
                let before = batch.len();
                batch = filter_batch(
                    dedup.as_mut(),
                    batch,
                    &config.query_field,
                    config.similarity_threshold,
                    config.dedup_within_import,
                )
                .await?;
                tally.skipped_duplicates += (before - batch.len()) as u64;
            }
            if batch.is_empty() {
                continue;
            }

            let items: Vec<DatasetItem> = batch
                .into_iter()
                .map(|record| {
                    let item = DatasetItem::new(dataset_id, next_seq, classify_item(&record), record);
                    next_seq += 1;
                    item
                })
                .collect();
            let written = items.len() as u64;
            let records = records.clone();
            blocking(move || records.insert_items(&items)).await?;
            tally.appended += written;
            debug!(job_id = %job.id, written, next_seq, "Batch persisted");
        }
        decoder
            .await
            .map_err(|e| Error::Storage(format!("decoder thread failed: {}", e)))?;

        let detection = detect(&sample, DEFAULT_SAMPLE_SIZE);
        match job.kind {
            JobKind::Create => {
                if dataset.field_mapping == FieldMapping::default() {
                    dataset.field_mapping = detection.suggested_mapping;
                } else {
                    dataset.field_mapping.merge_detected(&detection.detected_fields);
                }
                dataset.status = DatasetStatus::Ready;
            }
            JobKind::Append => dataset.field_mapping.merge_detected(&detection.detected_fields),
        }
        dataset.item_count += tally.appended;
        dataset.next_seq = next_seq;
        dataset.touch();
        tally.new_total = dataset.item_count;

        // Index first: a stale index is rebuilt on the next append, stale counters are not
        if let Some(dedup) = dedup {
            let artifacts = dedup.export_artifacts()?;
            let strategy = dedup.strategy();
            let indexes = self.storage.indexes.clone();
            blocking(move || indexes.save(dataset_id, strategy, &artifacts)).await?;
            debug!(dataset_id, strategy = %strategy, indexed = dedup.len(), "Dedup index saved");
        }
        blocking(move || records.update_dataset(&dataset)).await?;
        Ok(tally)
    }

    /// Decoder thread feeding normalized batches of `batch_size` records
    fn spawn_decoder(&self, job: &ImportJob) -> (mpsc::Receiver<Result<Vec<Record>>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(DECODE_CHANNEL_DEPTH);
        let path = job.spool_path.clone();
        let format = job.format;
        let work_dir = self.storage.spool.work_dir(&job.id);
        let max_extracted = self.settings.max_extracted_size;
        let batch_size = self.settings.batch_size.max(1);

        let handle = tokio::task::spawn_blocking(move || {
            let records = match open_records(&path, format, &work_dir, max_extracted) {
                Ok(records) => records,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            let mut batch = Vec::with_capacity(batch_size);
            for record in records {
                match record {
                    Ok(mut record) => {
                        normalize_in_place(&mut record);
                        batch.push(record);
                        if batch.len() >= batch_size {
                            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                            if tx.blocking_send(Ok(full)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        return;
                    }
                }
            }
            if !batch.is_empty() {
                let _ = tx.blocking_send(Ok(batch));
            }
        });
        (rx, handle)
    }

    /// Load the saved index when it still covers every item, else rebuild it
    async fn prepare_index(&self, dataset: &Dataset) -> Result<Box<dyn Deduplicator>> {
        let config = &dataset.dedup_config;
        let mut dedup = create_deduplicator(config, self.provider.clone())?;
        let strategy = dedup.strategy();
        let dataset_id = dataset.id;

        let indexes = self.storage.indexes.clone();
        if let Some(artifacts) = blocking(move || indexes.load(dataset_id, strategy)).await? {
            match dedup.import_artifacts(&artifacts) {
                Ok(()) if dedup.len() as u64 == dataset.item_count => {
                    debug!(dataset_id, strategy = %strategy, indexed = dedup.len(), "Loaded dedup index");
                    return Ok(dedup);
                }
                Ok(()) => warn!(
                    dataset_id,
                    indexed = dedup.len(),
                    items = dataset.item_count,
                    "Dedup index out of date, rebuilding"
                ),
                Err(e) => warn!(dataset_id, error = %e, "Ignoring unreadable dedup index"),
            }
        }

        let records = self.storage.records.clone();
        let items = blocking(move || records.items(dataset_id)).await?;
        let texts: Vec<String> = items
            .iter()
            .map(|item| extract_query_text(&item.current_content, &config.query_field))
            .collect();
        dedup.build_index(&texts).await?;
        info!(dataset_id, strategy = %strategy, indexed = texts.len(), "Built dedup index");
        Ok(dedup)
    }

    /// Undo a failed job: a created dataset disappears, an append loses the
    /// items it wrote.
    pub async fn rollback(&self, job: &ImportJob) -> Result<()> {
        let records = self.storage.records.clone();
        let dataset_id = job.dataset_id;
        match job.kind {
            JobKind::Create => {
                let indexes = self.storage.indexes.clone();
                blocking(move || {
                    records.delete_dataset(dataset_id)?;
                    indexes.remove(dataset_id)
                })
                .await?;
                info!(dataset_id, "Rolled back dataset creation");
            }
            JobKind::Append => {
                let from_seq = job.base_next_seq;
                let removed = blocking(move || records.delete_items_from(dataset_id, from_seq)).await?;
                info!(dataset_id, removed, from_seq, "Rolled back appended items");
            }
        }
        Ok(())
    }

    /// Put the dataset back into the state the job started from, keeping it.
    ///
    /// Used before a job is re-run after a restart.
    pub async fn reset(&self, job: &ImportJob) -> Result<()> {
        let records = self.storage.records.clone();
        let dataset_id = job.dataset_id;
        let base = job.base_next_seq;
        let kind = job.kind;
        let removed = blocking(move || {
            let mut dataset = records.get_dataset(dataset_id)?;
            let removed = records.delete_items_from(dataset_id, base)?;
            dataset.item_count = records.item_count(dataset_id)?;
            dataset.next_seq = base;
            if kind == JobKind::Create {
                dataset.status = DatasetStatus::Importing;
            }
            dataset.touch();
            records.update_dataset(&dataset)?;
            Ok(removed)
        })
        .await?;
        debug!(job_id = %job.id, dataset_id, removed, "Reset dataset for re-run");
        Ok(())
    }

    /// Field detection on the first `preview_limit` records of an upload.
    ///
    /// Nothing is persisted; the archive scratch directory is removed
    /// before returning.
    pub async fn preview(&self, path: PathBuf, format: DataFormat) -> Result<PreviewReport> {
        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let work_dir = self.storage.spool.work_dir(&format!("{}.preview", stem));
        let max_extracted = self.settings.max_extracted_size;
        let limit = self.settings.preview_limit;

        let cleanup = work_dir.clone();
        let report = blocking(move || {
            let (source, format) = resolve_source(&path, format, &work_dir, max_extracted)?;
            let mut records = preview_file(&source, format, limit)?;
            records.iter_mut().for_each(normalize_in_place);
            let estimate = estimate_count(&source, format)?;
            Ok(PreviewReport::from_records(&records, estimate))
        })
        .await;
        if cleanup.exists() {
            let _ = std::fs::remove_dir_all(&cleanup);
        }
        report
    }
}

/// Drop the records of `batch` that duplicate the index or, when
/// `within_batch` is set, an earlier accepted record of the batch. Accepted
/// texts are appended to the index.
async fn filter_batch(
    dedup: &mut dyn Deduplicator,
    batch: Vec<Record>,
    query_field: &str,
    threshold: f32,
    within_batch: bool,
) -> Result<Vec<Record>> {
    let texts: Vec<String> = batch
        .iter()
        .map(|record| extract_query_text(record, query_field))
        .collect();
    let mut duplicate = dedup.check_duplicates(&texts, threshold).await?;

    if within_batch {
        let (positions, candidates): (Vec<usize>, Vec<String>) = duplicate
            .iter()
            .enumerate()
            .filter(|(_, dup)| !**dup)
            .map(|(i, _)| (i, texts[i].clone()))
            .unzip();
        let repeats = dedup.mark_repeats(&candidates, threshold).await?;
        for (i, repeat) in positions.into_iter().zip(repeats) {
            duplicate[i] |= repeat;
        }
    }

    let mut accepted_texts = Vec::new();
    let mut kept = Vec::with_capacity(batch.len());
    for ((record, text), dup) in batch.into_iter().zip(texts).zip(duplicate) {
        if !dup {
            accepted_texts.push(text);
            kept.push(record);
        }
    }
    dedup.add_to_index(&accepted_texts).await?;
    Ok(kept)
}
