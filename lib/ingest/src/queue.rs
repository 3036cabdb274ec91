// Background import queue
// A fixed pool of tokio workers drains a bounded FIFO of import jobs

use parking_lot::Mutex;
use revdata_core::{Error, ImportJob, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::importer::Importer;
use crate::locks::DatasetGuard;

/// A job plus the lock on its dataset, released once the job is done
pub struct QueuedJob {
    pub job: ImportJob,
    pub guard: DatasetGuard,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub processed: u64,
    pub failed: u64,
    pub pending: usize,
}

pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl JobQueue {
    /// Spawn `workers` tasks on the current runtime
    pub fn start(importer: Importer, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<QueuedJob>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let importer = importer.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(QueuedJob { job, guard }) = next else {
                            break;
                        };
                        debug!(
                            worker_id,
                            job_id = %job.id,
                            dataset_id = guard.dataset_id(),
                            "Worker picked up job"
                        );
                        if importer.process(job).await.is_err() {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        drop(guard);
                    }
                    debug!(worker_id, "Import worker stopped");
                })
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), capacity, "Import queue started");
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
            capacity,
        }
    }

    /// Enqueue a job; waits while the queue is full
    pub async fn submit(&self, job: ImportJob, guard: DatasetGuard) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| Error::Storage("import queue is shut down".into()))?;
        sender
            .send(QueuedJob { job, guard })
            .await
            .map_err(|_| Error::Storage("import queue is closed".into()))?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self
            .sender
            .lock()
            .as_ref()
            .map(|s| self.capacity - s.capacity())
            .unwrap_or(0);
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending,
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("Import queue drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::ImportSettings;
    use crate::locks::DatasetLocks;
    use revdata_core::{JobKind, JobStatus, NewDataset};
    use revdata_storage::StorageManager;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_jobs_run_and_release_locks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::in_memory(dir.path(), 1 << 20, 64).unwrap();
        let queue = JobQueue::start(Importer::new(storage.clone(), ImportSettings::default()), 2, 4);
        let locks = DatasetLocks::new();

        let mut ids = Vec::new();
        for body in ["{\"q\":\"a\"}\n", "not json\n"] {
            let upload = storage
                .spool
                .spool_reader("x.jsonl", Cursor::new(body.as_bytes().to_vec()))
                .unwrap();
            let dataset = storage.records.create_dataset(NewDataset::default(), upload.format).unwrap();
            let job = ImportJob::queued(dataset.id, JobKind::Create, upload.path, upload.filename, upload.format, 1);
            storage.jobs.put_job(&job).unwrap();
            ids.push((dataset.id, job.id.clone()));
            queue.submit(job, locks.acquire(dataset.id).unwrap()).await.unwrap();
        }

        queue.shutdown().await;
        let stats = queue.stats();
        assert_eq!((stats.submitted, stats.processed, stats.failed), (2, 2, 1));

        assert_eq!(storage.jobs.get_job(&ids[0].1).unwrap().status, JobStatus::Succeeded);
        assert_eq!(storage.jobs.get_job(&ids[1].1).unwrap().status, JobStatus::Failed);
        assert!(ids.iter().all(|(ds, _)| !locks.is_locked(*ds)));

        let upload = storage.spool.spool_reader("y.jsonl", Cursor::new(b"{}".to_vec())).unwrap();
        let job = ImportJob::queued(1, JobKind::Append, upload.path, upload.filename, upload.format, 2);
        assert!(queue.submit(job, locks.acquire(1).unwrap()).await.is_err());
    }
}
