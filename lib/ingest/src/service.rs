use revdata_core::normalize::normalize;
use revdata_core::{
    AppendTally, DataFormat, Dataset, DatasetId, DatasetItem, ImportJob, JobKind, NewDataset, Result,
};
use revdata_schema::PreviewReport;
use revdata_storage::{SpooledUpload, StorageManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::importer::{blocking, Importer};
use crate::locks::{DatasetGuard, DatasetLocks};
use crate::queue::{JobQueue, QueueStats};
use crate::recovery::{recover_jobs, RecoveryReport};

/// Entry point used by the HTTP API and the CLI.
///
/// Submissions return as soon as the job is durable and queued; the
/// `*_now` variants run the import on the caller's task instead.
#[derive(Clone)]
pub struct IngestService {
    importer: Importer,
    locks: DatasetLocks,
    queue: Arc<JobQueue>,
}

impl IngestService {
    /// Start the worker pool on the current runtime
    pub fn start(importer: Importer, workers: usize, queue_capacity: usize) -> Self {
        let queue = Arc::new(JobQueue::start(importer.clone(), workers, queue_capacity));
        Self {
            importer,
            locks: DatasetLocks::new(),
            queue,
        }
    }

    #[inline]
    pub fn storage(&self) -> &StorageManager {
        self.importer.storage()
    }

    #[inline]
    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    #[inline]
    pub fn locks(&self) -> &DatasetLocks {
        &self.locks
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Create a dataset in `importing` state and queue its import
    pub async fn submit_create(&self, upload: SpooledUpload, new: NewDataset) -> Result<(Dataset, ImportJob)> {
        let result = self.try_submit_create(&upload, new).await;
        if result.is_err() {
            self.storage().spool.discard(&upload.path, None);
        }
        result
    }

    async fn try_submit_create(&self, upload: &SpooledUpload, new: NewDataset) -> Result<(Dataset, ImportJob)> {
        let (dataset, job, guard) = self.create_pending(upload, new).await?;
        if let Err(e) = self.enqueue(job.clone(), guard).await {
            self.importer.rollback(&job).await?;
            return Err(e);
        }
        info!(dataset_id = dataset.id, job_id = %job.id, "Queued dataset import");
        Ok((dataset, job))
    }

    /// Queue an append into an existing dataset
    pub async fn submit_append(&self, dataset_id: DatasetId, upload: SpooledUpload) -> Result<ImportJob> {
        let result = self.try_submit_append(dataset_id, &upload).await;
        if result.is_err() {
            self.storage().spool.discard(&upload.path, None);
        }
        result
    }

    async fn try_submit_append(&self, dataset_id: DatasetId, upload: &SpooledUpload) -> Result<ImportJob> {
        let (job, guard) = self.append_pending(dataset_id, upload).await?;
        self.enqueue(job.clone(), guard).await?;
        info!(dataset_id, job_id = %job.id, "Queued append import");
        Ok(job)
    }

    /// Import synchronously and return the finished dataset
    pub async fn import_now(&self, upload: SpooledUpload, new: NewDataset) -> Result<Dataset> {
        let (dataset, job, guard) = match self.create_pending(&upload, new).await {
            Ok(pending) => pending,
            Err(e) => {
                self.storage().spool.discard(&upload.path, None);
                return Err(e);
            }
        };
        self.importer.process(job).await?;
        drop(guard);
        self.dataset(dataset.id).await
    }

    /// Append synchronously
    pub async fn append_now(&self, dataset_id: DatasetId, upload: SpooledUpload) -> Result<AppendTally> {
        let (job, guard) = match self.append_pending(dataset_id, &upload).await {
            Ok(pending) => pending,
            Err(e) => {
                self.storage().spool.discard(&upload.path, None);
                return Err(e);
            }
        };
        let tally = self.importer.process(job).await;
        drop(guard);
        tally
    }

    async fn create_pending(&self, upload: &SpooledUpload, mut new: NewDataset) -> Result<(Dataset, ImportJob, DatasetGuard)> {
        new.dedup_config.validate()?;
        if new.source_file.is_empty() {
            new.source_file = upload.filename.clone();
        }
        if new.name.is_empty() {
            new.name = upload.filename.clone();
        }
        let format = new.format.unwrap_or(upload.format);

        let records = self.storage().records.clone();
        let dataset = blocking(move || records.create_dataset(new, format)).await?;
        let guard = self.locks.acquire(dataset.id)?;
        let job = ImportJob::queued(
            dataset.id,
            JobKind::Create,
            upload.path.clone(),
            upload.filename.clone(),
            format,
            dataset.next_seq,
        )
        .with_checksum(upload.sha256.clone());
        if let Err(e) = self.put_job(&job).await {
            self.importer.rollback(&job).await?;
            return Err(e);
        }
        Ok((dataset, job, guard))
    }

    async fn append_pending(&self, dataset_id: DatasetId, upload: &SpooledUpload) -> Result<(ImportJob, DatasetGuard)> {
        let guard = self.locks.acquire(dataset_id)?;
        let dataset = self.dataset(dataset_id).await?;
        let job = ImportJob::queued(
            dataset_id,
            JobKind::Append,
            upload.path.clone(),
            upload.filename.clone(),
            upload.format,
            dataset.next_seq,
        )
        .with_checksum(upload.sha256.clone());
        self.put_job(&job).await?;
        Ok((job, guard))
    }

    async fn enqueue(&self, job: ImportJob, guard: DatasetGuard) -> Result<()> {
        if let Err(e) = self.queue.submit(job.clone(), guard).await {
            let mut failed = job;
            failed.fail(&e);
            if let Err(put) = self.put_job(&failed).await {
                warn!(job_id = %failed.id, error = %put, "Failed to record rejected job");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn put_job(&self, job: &ImportJob) -> Result<()> {
        let jobs = self.storage().jobs.clone();
        let job = job.clone();
        blocking(move || jobs.put_job(&job)).await
    }

    /// Field detection on an upload that is not kept
    pub async fn preview(&self, upload: SpooledUpload) -> Result<PreviewReport> {
        let report = self.importer.preview(upload.path.clone(), upload.format).await;
        self.storage().spool.discard(&upload.path, None);
        report
    }

    /// Same as [`preview`](Self::preview) for a file the caller owns
    pub async fn preview_path(&self, path: PathBuf, format: DataFormat) -> Result<PreviewReport> {
        self.importer.preview(path, format).await
    }

    /// Resume or fail jobs left over from a previous run
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let report = recover_jobs(&self.importer, &self.locks, &self.queue).await?;
        if report.requeued + report.failed > 0 {
            info!(requeued = report.requeued, failed = report.failed, "Recovered unfinished imports");
        }
        Ok(report)
    }

    /// Re-normalize the stored content of every idle dataset; returns how
    /// many items changed
    pub async fn normalize_all(&self) -> Result<u64> {
        let datasets = self.datasets().await?;
        let mut changed = 0;
        for dataset in datasets {
            let _guard = match self.locks.acquire(dataset.id) {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(dataset_id = dataset.id, "Import in progress, skipping normalization");
                    continue;
                }
            };
            let records = self.storage().records.clone();
            let dataset_id = dataset.id;
            let updated = blocking(move || {
                let items: Vec<DatasetItem> = records
                    .items(dataset_id)?
                    .into_iter()
                    .filter_map(|mut item| {
                        let original = normalize(&item.original_content);
                        let current = normalize(&item.current_content);
                        if original == item.original_content && current == item.current_content {
                            return None;
                        }
                        item.original_content = original;
                        item.current_content = current;
                        Some(item)
                    })
                    .collect();
                records.update_items(&items)?;
                Ok(items.len() as u64)
            })
            .await?;
            if updated > 0 {
                info!(dataset_id, updated, "Normalized stored items");
            }
            changed += updated;
        }
        Ok(changed)
    }

    pub async fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        let records = self.storage().records.clone();
        blocking(move || records.get_dataset(id)).await
    }

    pub async fn datasets(&self) -> Result<Vec<Dataset>> {
        let records = self.storage().records.clone();
        blocking(move || records.list_datasets()).await
    }

    pub async fn job(&self, id: &str) -> Result<ImportJob> {
        let jobs = self.storage().jobs.clone();
        let id = id.to_string();
        blocking(move || jobs.get_job(&id)).await
    }

    /// Stop accepting jobs and let the queued ones finish
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::ImportSettings;
    use revdata_core::{DatasetStatus, Error, ItemType, JobStatus};
    use serde_json::json;
    use std::io::Cursor;
    use std::time::Duration;

    fn service(dir: &std::path::Path) -> IngestService {
        let storage = StorageManager::in_memory(dir.join("uploads"), 1 << 20, 64).unwrap();
        IngestService::start(Importer::new(storage, ImportSettings::default()), 1, 8)
    }

    fn spool(service: &IngestService, name: &str, body: &str) -> SpooledUpload {
        service
            .storage()
            .spool
            .spool_reader(name, Cursor::new(body.as_bytes().to_vec()))
            .unwrap()
    }

    async fn wait_for(service: &IngestService, job_id: &str) -> ImportJob {
        for _ in 0..200 {
            let job = service.job(job_id).await.unwrap();
            if !job.status.is_active() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    #[tokio::test]
    async fn test_submit_create_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let upload = spool(&service, "faq.jsonl", "{\"question\":\"Q1\",\"answer\":\"A1\"}\n");
        let (dataset, job) = service
            .submit_create(upload, NewDataset { name: "faq".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(dataset.status, DatasetStatus::Importing);
        assert_eq!(dataset.source_file, "faq.jsonl");
        assert_eq!(wait_for(&service, &job.id).await.status, JobStatus::Succeeded);

        let upload = spool(&service, "more.jsonl", "{\"question\":\"Q2\",\"answer\":\"A2\"}\n");
        let upload_sha = upload.sha256.clone();
        let job = service.submit_append(dataset.id, upload).await.unwrap();
        assert_eq!(job.base_next_seq, 2);
        assert_eq!(job.sha256.as_deref(), Some(upload_sha.as_str()));
        let done = wait_for(&service, &job.id).await;
        assert_eq!(done.outcome.unwrap().new_total, 2);

        let dataset = service.dataset(dataset.id).await.unwrap();
        assert_eq!(dataset.status, DatasetStatus::Ready);
        assert_eq!(dataset.item_count, 2);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_rejected_while_import_active() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let dataset = service
            .import_now(spool(&service, "a.jsonl", "{\"q\":\"1\"}\n"), NewDataset::default())
            .await
            .unwrap();

        let _held = service.locks().acquire(dataset.id).unwrap();
        let upload = spool(&service, "b.jsonl", "{\"q\":\"2\"}\n");
        let path = upload.path.clone();
        let err = service.submit_append(dataset.id, upload).await.unwrap_err();
        assert!(matches!(err, Error::ImportInProgress(id) if id == dataset.id));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_append_to_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let upload = spool(&service, "b.jsonl", "{\"q\":\"2\"}\n");
        let err = service.append_now(42, upload).await.unwrap_err();
        assert!(matches!(err, Error::DatasetNotFound(42)));
        assert!(!service.locks().is_locked(42));
    }

    #[tokio::test]
    async fn test_invalid_dedup_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut new = NewDataset::default();
        new.dedup_config.similarity_threshold = 1.5;
        let err = service
            .submit_create(spool(&service, "a.jsonl", "{}\n"), new)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(service.datasets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_normalize_all() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let dataset = service
            .import_now(spool(&service, "a.jsonl", "{\"q\":\"clean\"}\n"), NewDataset::default())
            .await
            .unwrap();
        // Content written before normalization existed
        service
            .storage()
            .records
            .insert_items(&[DatasetItem::new(dataset.id, 2, ItemType::Plain, json!({"q\u{200b}": " dirty\u{feff}"}))])
            .unwrap();

        assert_eq!(service.normalize_all().await.unwrap(), 1);
        let items = service.storage().records.items(dataset.id).unwrap();
        assert_eq!(items[1].current_content, json!({"q": "dirty"}));
        assert_eq!(service.normalize_all().await.unwrap(), 0);
    }
}
