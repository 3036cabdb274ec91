//! Store abstractions.
//!
//! Both traits are synchronous; async callers run them on a blocking thread.
//! Every method is a single transaction in the LMDB implementation.

use revdata_core::{DataFormat, Dataset, DatasetId, DatasetItem, ImportJob, NewDataset, Result};

/// Datasets and their items
pub trait RecordStore: Send + Sync {
    /// Persist a new dataset in `importing` state under a fresh id
    fn create_dataset(&self, new: NewDataset, format: DataFormat) -> Result<Dataset>;

    fn get_dataset(&self, id: DatasetId) -> Result<Dataset>;

    fn update_dataset(&self, dataset: &Dataset) -> Result<()>;

    /// Remove a dataset together with all of its items
    fn delete_dataset(&self, id: DatasetId) -> Result<()>;

    fn list_datasets(&self) -> Result<Vec<Dataset>>;

    /// Write a batch of items atomically
    fn insert_items(&self, items: &[DatasetItem]) -> Result<()>;

    /// Overwrite existing items in place
    fn update_items(&self, items: &[DatasetItem]) -> Result<()> {
        self.insert_items(items)
    }

    /// Remove items with `seq_num >= from_seq`; returns how many were removed
    fn delete_items_from(&self, dataset_id: DatasetId, from_seq: u64) -> Result<u64>;

    /// All items of a dataset ordered by `seq_num`
    fn items(&self, dataset_id: DatasetId) -> Result<Vec<DatasetItem>>;

    fn item_count(&self, dataset_id: DatasetId) -> Result<u64>;
}

/// Durable import jobs
pub trait JobStore: Send + Sync {
    fn put_job(&self, job: &ImportJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<ImportJob>;

    fn list_jobs(&self) -> Result<Vec<ImportJob>>;

    /// Jobs still queued or running, oldest first
    fn active_jobs(&self) -> Result<Vec<ImportJob>> {
        let mut jobs: Vec<ImportJob> = self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}
