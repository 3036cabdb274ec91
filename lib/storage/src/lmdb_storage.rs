// LMDB-backed record and job store
use anyhow::{anyhow, Context};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use revdata_core::{
    DataFormat, Dataset, DatasetId, DatasetItem, Error, ImportJob, NewDataset, Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::store::{JobStore, RecordStore};

const DB_DATASETS: &str = "datasets";
const DB_ITEMS: &str = "items";
const DB_JOBS: &str = "jobs";
const DB_META: &str = "meta";

const KEY_NEXT_DATASET_ID: &str = "next_dataset_id";

/// Default map size; LMDB only reserves address space
const MAP_SIZE: usize = 100 * 1024 * 1024 * 1024;

type StrDb = Database<heed::types::Str, heed::types::Bytes>;

fn dataset_key(id: DatasetId) -> String {
    format!("{:020}", id)
}

/// Zero padding keeps lexical key order equal to `seq_num` order
fn item_key(dataset_id: DatasetId, seq: u64) -> String {
    format!("{:020}:{:020}", dataset_id, seq)
}

fn item_prefix(dataset_id: DatasetId) -> String {
    format!("{:020}:", dataset_id)
}

fn storage_err(e: anyhow::Error) -> Error {
    Error::Storage(format!("{:#}", e))
}

fn encode<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub struct LmdbStore {
    env: Arc<Env>,
    datasets_db: StrDb,
    items_db: StrDb,
    jobs_db: StrDb,
    meta_db: StrDb,
}

impl LmdbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref()).map_err(storage_err)
    }

    fn open_inner(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating LMDB directory {}", path.display()))?;

        let env = Arc::new(unsafe { EnvOpenOptions::new().map_size(MAP_SIZE).max_dbs(10).open(path)? });

        let mut wtxn = env.write_txn()?;
        let datasets_db = env.create_database(&mut wtxn, Some(DB_DATASETS))?;
        let items_db = env.create_database(&mut wtxn, Some(DB_ITEMS))?;
        let jobs_db = env.create_database(&mut wtxn, Some(DB_JOBS))?;
        let meta_db = env.create_database(&mut wtxn, Some(DB_META))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            datasets_db,
            items_db,
            jobs_db,
            meta_db,
        })
    }

    fn next_dataset_id(&self, wtxn: &mut RwTxn) -> anyhow::Result<DatasetId> {
        let current = match self.meta_db.get(wtxn, KEY_NEXT_DATASET_ID)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("corrupt dataset id counter"))?;
                u64::from_le_bytes(raw)
            }
            None => 1,
        };
        self.meta_db
            .put(wtxn, KEY_NEXT_DATASET_ID, &(current + 1).to_le_bytes())?;
        Ok(current)
    }

    fn delete_items_inner(&self, wtxn: &mut RwTxn, dataset_id: DatasetId, from_seq: u64) -> anyhow::Result<u64> {
        let start = item_key(dataset_id, from_seq);
        let mut keys = Vec::new();
        for entry in self.items_db.prefix_iter(wtxn, &item_prefix(dataset_id))? {
            let (key, _) = entry?;
            if key >= start.as_str() {
                keys.push(key.to_string());
            }
        }
        for key in &keys {
            self.items_db.delete(wtxn, key)?;
        }
        Ok(keys.len() as u64)
    }

    fn get_dataset_inner(&self, id: DatasetId) -> anyhow::Result<Option<Dataset>> {
        let rtxn = self.env.read_txn()?;
        match self.datasets_db.get(&rtxn, &dataset_key(id))? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn put_items(&self, items: &[DatasetItem]) -> anyhow::Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for item in items {
            let key = item_key(item.dataset_id, item.seq_num);
            self.items_db.put(&mut wtxn, &key, &encode(item)?)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

impl RecordStore for LmdbStore {
    fn create_dataset(&self, new: NewDataset, format: DataFormat) -> Result<Dataset> {
        let inner = || -> anyhow::Result<Dataset> {
            let mut wtxn = self.env.write_txn()?;
            let id = self.next_dataset_id(&mut wtxn)?;
            let dataset = Dataset::importing(id, new, format);
            self.datasets_db
                .put(&mut wtxn, &dataset_key(id), &encode(&dataset)?)?;
            wtxn.commit()?;
            Ok(dataset)
        };
        inner().map_err(storage_err)
    }

    fn get_dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.get_dataset_inner(id)
            .map_err(storage_err)?
            .ok_or(Error::DatasetNotFound(id))
    }

    fn update_dataset(&self, dataset: &Dataset) -> Result<()> {
        let inner = || -> anyhow::Result<bool> {
            let mut wtxn = self.env.write_txn()?;
            let key = dataset_key(dataset.id);
            if self.datasets_db.get(&wtxn, &key)?.is_none() {
                return Ok(false);
            }
            self.datasets_db.put(&mut wtxn, &key, &encode(dataset)?)?;
            wtxn.commit()?;
            Ok(true)
        };
        match inner().map_err(storage_err)? {
            true => Ok(()),
            false => Err(Error::DatasetNotFound(dataset.id)),
        }
    }

    fn delete_dataset(&self, id: DatasetId) -> Result<()> {
        let inner = || -> anyhow::Result<()> {
            let mut wtxn = self.env.write_txn()?;
            self.delete_items_inner(&mut wtxn, id, 0)?;
            self.datasets_db.delete(&mut wtxn, &dataset_key(id))?;
            wtxn.commit()?;
            Ok(())
        };
        inner().map_err(storage_err)
    }

    fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let inner = || -> anyhow::Result<Vec<Dataset>> {
            let rtxn = self.env.read_txn()?;
            let mut datasets = Vec::new();
            for entry in self.datasets_db.iter(&rtxn)? {
                let (_, bytes) = entry?;
                datasets.push(decode(bytes)?);
            }
            Ok(datasets)
        };
        inner().map_err(storage_err)
    }

    fn insert_items(&self, items: &[DatasetItem]) -> Result<()> {
        self.put_items(items).map_err(storage_err)
    }

    fn delete_items_from(&self, dataset_id: DatasetId, from_seq: u64) -> Result<u64> {
        let inner = || -> anyhow::Result<u64> {
            let mut wtxn = self.env.write_txn()?;
            let removed = self.delete_items_inner(&mut wtxn, dataset_id, from_seq)?;
            wtxn.commit()?;
            Ok(removed)
        };
        inner().map_err(storage_err)
    }

    fn items(&self, dataset_id: DatasetId) -> Result<Vec<DatasetItem>> {
        let inner = || -> anyhow::Result<Vec<DatasetItem>> {
            let rtxn = self.env.read_txn()?;
            let mut items = Vec::new();
            for entry in self.items_db.prefix_iter(&rtxn, &item_prefix(dataset_id))? {
                let (_, bytes) = entry?;
                items.push(decode(bytes)?);
            }
            Ok(items)
        };
        inner().map_err(storage_err)
    }

    fn item_count(&self, dataset_id: DatasetId) -> Result<u64> {
        let inner = || -> anyhow::Result<u64> {
            let rtxn = self.env.read_txn()?;
            let mut count = 0;
            for entry in self.items_db.prefix_iter(&rtxn, &item_prefix(dataset_id))? {
                entry?;
                count += 1;
            }
            Ok(count)
        };
        inner().map_err(storage_err)
    }
}

impl JobStore for LmdbStore {
    fn put_job(&self, job: &ImportJob) -> Result<()> {
        let inner = || -> anyhow::Result<()> {
            let mut wtxn = self.env.write_txn()?;
            self.jobs_db.put(&mut wtxn, &job.id, &encode(job)?)?;
            wtxn.commit()?;
            Ok(())
        };
        inner().map_err(storage_err)
    }

    fn get_job(&self, id: &str) -> Result<ImportJob> {
        let inner = || -> anyhow::Result<Option<ImportJob>> {
            let rtxn = self.env.read_txn()?;
            match self.jobs_db.get(&rtxn, id)? {
                Some(bytes) => Ok(Some(decode(bytes)?)),
                None => Ok(None),
            }
        };
        inner()
            .map_err(storage_err)?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    fn list_jobs(&self) -> Result<Vec<ImportJob>> {
        let inner = || -> anyhow::Result<Vec<ImportJob>> {
            let rtxn = self.env.read_txn()?;
            let mut jobs = Vec::new();
            for entry in self.jobs_db.iter(&rtxn)? {
                let (_, bytes) = entry?;
                jobs.push(decode(bytes)?);
            }
            Ok(jobs)
        };
        inner().map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdata_core::{ItemType, JobKind, JobStatus};
    use serde_json::json;

    fn new_dataset(name: &str) -> NewDataset {
        NewDataset {
            name: name.into(),
            source_file: format!("{}.jsonl", name),
            ..Default::default()
        }
    }

    fn items(dataset_id: DatasetId, seqs: std::ops::Range<u64>) -> Vec<DatasetItem> {
        seqs.map(|s| DatasetItem::new(dataset_id, s, ItemType::Plain, json!({"text": format!("t{}", s)})))
            .collect()
    }

    #[test]
    fn test_dataset_ids_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LmdbStore::open(dir.path()).unwrap();
            assert_eq!(store.create_dataset(new_dataset("a"), DataFormat::Jsonl).unwrap().id, 1);
            assert_eq!(store.create_dataset(new_dataset("b"), DataFormat::Csv).unwrap().id, 2);
        }
        let store = LmdbStore::open(dir.path()).unwrap();
        assert_eq!(store.list_datasets().unwrap().len(), 2);
        assert_eq!(store.create_dataset(new_dataset("c"), DataFormat::Json).unwrap().id, 3);
        assert!(matches!(store.get_dataset(42), Err(Error::DatasetNotFound(42))));
    }

    #[test]
    fn test_items_ordered_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();
        let a = store.create_dataset(new_dataset("a"), DataFormat::Jsonl).unwrap();
        let b = store.create_dataset(new_dataset("b"), DataFormat::Jsonl).unwrap();

        // Insert out of order and across a digit boundary
        store.insert_items(&items(a.id, 9..12)).unwrap();
        store.insert_items(&items(a.id, 1..9)).unwrap();
        store.insert_items(&items(b.id, 1..4)).unwrap();

        let seqs: Vec<u64> = store.items(a.id).unwrap().iter().map(|i| i.seq_num).collect();
        assert_eq!(seqs, (1..12).collect::<Vec<_>>());
        assert_eq!(store.item_count(b.id).unwrap(), 3);
    }

    #[test]
    fn test_delete_items_from() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();
        let ds = store.create_dataset(new_dataset("a"), DataFormat::Jsonl).unwrap();
        store.insert_items(&items(ds.id, 1..21)).unwrap();

        assert_eq!(store.delete_items_from(ds.id, 11).unwrap(), 10);
        assert_eq!(store.item_count(ds.id).unwrap(), 10);
        assert_eq!(store.items(ds.id).unwrap().last().unwrap().seq_num, 10);
    }

    #[test]
    fn test_delete_dataset_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();
        let ds = store.create_dataset(new_dataset("a"), DataFormat::Jsonl).unwrap();
        store.insert_items(&items(ds.id, 1..5)).unwrap();
        store.delete_dataset(ds.id).unwrap();
        assert!(store.get_dataset(ds.id).is_err());
        assert_eq!(store.item_count(ds.id).unwrap(), 0);
    }

    #[test]
    fn test_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();
        let mut job = ImportJob::queued(1, JobKind::Create, "/tmp/u".into(), "u.jsonl".into(), DataFormat::Jsonl, 1);
        store.put_job(&job).unwrap();
        assert_eq!(store.active_jobs().unwrap().len(), 1);

        job.set_status(JobStatus::Succeeded);
        store.put_job(&job).unwrap();
        assert!(store.active_jobs().unwrap().is_empty());
        assert_eq!(store.get_job(&job.id).unwrap().status, JobStatus::Succeeded);
        assert!(matches!(store.get_job("missing"), Err(Error::JobNotFound(_))));
    }
}
