//! Persistence of dedup indexes, one per `(dataset, strategy)`

use atomicwrites::{AtomicFile, OverwriteBehavior};
use parking_lot::RwLock;
use revdata_core::{DatasetId, DedupStrategy, Error, Result};
use revdata_similarity::IndexArtifacts;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait IndexStore: Send + Sync {
    /// `None` when nothing was saved for this dataset and strategy
    fn load(&self, dataset_id: DatasetId, strategy: DedupStrategy) -> Result<Option<IndexArtifacts>>;

    fn save(&self, dataset_id: DatasetId, strategy: DedupStrategy, artifacts: &IndexArtifacts) -> Result<()>;

    /// Drop every index of a dataset
    fn remove(&self, dataset_id: DatasetId) -> Result<()>;
}

/// Files under `<data_dir>/dedup_index`
pub struct FsIndexStore {
    dir: PathBuf,
}

impl FsIndexStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// `dataset_{id}.jaccard.bin` or `dataset_{id}.vectors.bin`
    pub fn index_path(&self, dataset_id: DatasetId, strategy: DedupStrategy) -> PathBuf {
        self.dir
            .join(format!("dataset_{}.{}.bin", dataset_id, strategy.tag()))
    }

    /// `dataset_{id}.vectors.meta.json`
    pub fn meta_path(&self, dataset_id: DatasetId, strategy: DedupStrategy) -> PathBuf {
        self.dir
            .join(format!("dataset_{}.{}.meta.json", dataset_id, strategy.tag()))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(bytes))
            .map_err(|e| Error::Storage(format!("writing {}: {}", path.display(), e)))
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl IndexStore for FsIndexStore {
    fn load(&self, dataset_id: DatasetId, strategy: DedupStrategy) -> Result<Option<IndexArtifacts>> {
        let Some(index) = Self::read_optional(&self.index_path(dataset_id, strategy))? else {
            return Ok(None);
        };
        let meta = Self::read_optional(&self.meta_path(dataset_id, strategy))?;
        Ok(Some(IndexArtifacts { index, meta }))
    }

    fn save(&self, dataset_id: DatasetId, strategy: DedupStrategy, artifacts: &IndexArtifacts) -> Result<()> {
        let index_path = self.index_path(dataset_id, strategy);
        Self::write_atomic(&index_path, &artifacts.index)?;
        if let Some(meta) = &artifacts.meta {
            Self::write_atomic(&self.meta_path(dataset_id, strategy), meta)?;
        }
        debug!(dataset_id, strategy = %strategy, bytes = artifacts.index.len(), "Saved dedup index");
        Ok(())
    }

    fn remove(&self, dataset_id: DatasetId) -> Result<()> {
        for strategy in [DedupStrategy::Jaccard, DedupStrategy::Embedding] {
            for path in [self.index_path(dataset_id, strategy), self.meta_path(dataset_id, strategy)] {
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIndexStore {
    indexes: RwLock<HashMap<(DatasetId, DedupStrategy), IndexArtifacts>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self, dataset_id: DatasetId, strategy: DedupStrategy) -> Result<Option<IndexArtifacts>> {
        Ok(self.indexes.read().get(&(dataset_id, strategy)).cloned())
    }

    fn save(&self, dataset_id: DatasetId, strategy: DedupStrategy, artifacts: &IndexArtifacts) -> Result<()> {
        self.indexes
            .write()
            .insert((dataset_id, strategy), artifacts.clone());
        Ok(())
    }

    fn remove(&self, dataset_id: DatasetId) -> Result<()> {
        self.indexes.write().retain(|(ds, _), _| *ds != dataset_id);
        Ok(())
    }
}
