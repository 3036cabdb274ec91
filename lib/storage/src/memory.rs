use parking_lot::RwLock;
use revdata_core::{
    DataFormat, Dataset, DatasetId, DatasetItem, Error, ImportJob, NewDataset, Result,
};
use std::collections::{BTreeMap, HashMap};

use crate::store::{JobStore, RecordStore};

#[derive(Default)]
struct Inner {
    next_id: DatasetId,
    datasets: BTreeMap<DatasetId, Dataset>,
    items: BTreeMap<(DatasetId, u64), DatasetItem>,
    jobs: HashMap<String, ImportJob>,
}

/// Volatile store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn create_dataset(&self, new: NewDataset, format: DataFormat) -> Result<Dataset> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let dataset = Dataset::importing(inner.next_id, new, format);
        inner.datasets.insert(dataset.id, dataset.clone());
        Ok(dataset)
    }

    fn get_dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.inner
            .read()
            .datasets
            .get(&id)
            .cloned()
            .ok_or(Error::DatasetNotFound(id))
    }

    fn update_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.datasets.get_mut(&dataset.id) {
            Some(slot) => {
                *slot = dataset.clone();
                Ok(())
            }
            None => Err(Error::DatasetNotFound(dataset.id)),
        }
    }

    fn delete_dataset(&self, id: DatasetId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.datasets.remove(&id);
        inner.items.retain(|(ds, _), _| *ds != id);
        Ok(())
    }

    fn list_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(self.inner.read().datasets.values().cloned().collect())
    }

    fn insert_items(&self, items: &[DatasetItem]) -> Result<()> {
        let mut inner = self.inner.write();
        for item in items {
            inner.items.insert((item.dataset_id, item.seq_num), item.clone());
        }
        Ok(())
    }

    fn delete_items_from(&self, dataset_id: DatasetId, from_seq: u64) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.items.len();
        inner
            .items
            .retain(|(ds, seq), _| !(*ds == dataset_id && *seq >= from_seq));
        Ok((before - inner.items.len()) as u64)
    }

    fn items(&self, dataset_id: DatasetId) -> Result<Vec<DatasetItem>> {
        Ok(self
            .inner
            .read()
            .items
            .range((dataset_id, 0)..=(dataset_id, u64::MAX))
            .map(|(_, item)| item.clone())
            .collect())
    }

    fn item_count(&self, dataset_id: DatasetId) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .items
            .range((dataset_id, 0)..=(dataset_id, u64::MAX))
            .count() as u64)
    }
}

impl JobStore for MemoryStore {
    fn put_job(&self, job: &ImportJob) -> Result<()> {
        self.inner.write().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<ImportJob> {
        self.inner
            .read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    fn list_jobs(&self) -> Result<Vec<ImportJob>> {
        Ok(self.inner.read().jobs.values().cloned().collect())
    }
}
