use revdata_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::index_store::{FsIndexStore, IndexStore, MemoryIndexStore};
use crate::lmdb_storage::LmdbStore;
use crate::memory::MemoryStore;
use crate::spool::UploadSpool;
use crate::store::{JobStore, RecordStore};

/// Everything the pipeline persists, opened from one data directory
#[derive(Clone)]
pub struct StorageManager {
    pub records: Arc<dyn RecordStore>,
    pub jobs: Arc<dyn JobStore>,
    pub indexes: Arc<dyn IndexStore>,
    pub spool: UploadSpool,
    data_dir: PathBuf,
}

impl StorageManager {
    /// Layout: `lmdb/`, `dedup_index/`, `uploads/`
    pub fn open<P: AsRef<Path>>(data_dir: P, max_upload_size: u64, chunk_size: usize) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let lmdb = Arc::new(LmdbStore::open(data_dir.join("lmdb"))?);
        let indexes = Arc::new(FsIndexStore::new(data_dir.join("dedup_index"))?);
        let spool = UploadSpool::new(data_dir.join("uploads"), max_upload_size, chunk_size)?;

        info!(data_dir = %data_dir.display(), "Storage opened");
        Ok(Self {
            records: lmdb.clone(),
            jobs: lmdb,
            indexes,
            spool,
            data_dir,
        })
    }

    /// Volatile stores; only the spool touches disk
    pub fn in_memory<P: AsRef<Path>>(spool_dir: P, max_upload_size: u64, chunk_size: usize) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        Ok(Self {
            records: store.clone(),
            jobs: store,
            indexes: Arc::new(MemoryIndexStore::new()),
            spool: UploadSpool::new(spool_dir.as_ref(), max_upload_size, chunk_size)?,
            data_dir: spool_dir.as_ref().to_path_buf(),
        })
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdata_core::{DataFormat, NewDataset};

    #[test]
    fn test_open_layout() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::open(dir.path(), 1024, 64).unwrap();
        assert!(dir.path().join("lmdb").is_dir());
        assert!(dir.path().join("dedup_index").is_dir());
        assert_eq!(storage.spool.dir(), dir.path().join("uploads"));

        let ds = storage
            .records
            .create_dataset(NewDataset::default(), DataFormat::Jsonl)
            .unwrap();
        assert_eq!(storage.records.get_dataset(ds.id).unwrap().id, ds.id);
    }
}
