use parking_lot::Mutex;
use revdata_core::{DatasetId, Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// At most one queued or running import per dataset
#[derive(Clone, Default)]
pub struct DatasetLocks {
    active: Arc<Mutex<HashSet<DatasetId>>>,
}

/// Held for the lifetime of an import; releases the dataset on drop
pub struct DatasetGuard {
    locks: DatasetLocks,
    dataset_id: DatasetId,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, dataset_id: DatasetId) -> Result<DatasetGuard> {
        if !self.active.lock().insert(dataset_id) {
            return Err(Error::ImportInProgress(dataset_id));
        }
        Ok(DatasetGuard {
            locks: self.clone(),
            dataset_id,
        })
    }

    pub fn is_locked(&self, dataset_id: DatasetId) -> bool {
        self.active.lock().contains(&dataset_id)
    }
}

impl DatasetGuard {
    #[inline]
    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.dataset_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let locks = DatasetLocks::new();
        let guard = locks.acquire(5).unwrap();
        assert!(matches!(locks.acquire(5), Err(Error::ImportInProgress(5))));
        assert!(locks.acquire(6).is_ok());
        drop(guard);
        assert!(!locks.is_locked(5));
        assert!(locks.acquire(5).is_ok());
    }
}
