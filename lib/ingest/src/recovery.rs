//! Restart handling for jobs that were queued or running when the process
//! stopped.

use revdata_core::{Error, ImportJob, JobStatus, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::importer::{blocking, Importer};
use crate::locks::DatasetLocks;
use crate::queue::JobQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub failed: usize,
}

/// Re-queue every unfinished job whose spool file survived; the rest are
/// rolled back and marked failed.
pub async fn recover_jobs(importer: &Importer, locks: &DatasetLocks, queue: &JobQueue) -> Result<RecoveryReport> {
    let jobs = {
        let store = importer.storage().jobs.clone();
        blocking(move || store.active_jobs()).await?
    };
    let mut report = RecoveryReport::default();

    for mut job in jobs {
        let guard = match locks.acquire(job.dataset_id) {
            Ok(guard) => guard,
            Err(_) => {
                warn!(job_id = %job.id, dataset_id = job.dataset_id, "Second unfinished job for dataset, dropping it");
                mark_failed(importer, job, "superseded by another unfinished import").await?;
                report.failed += 1;
                continue;
            }
        };

        if !job.spool_path.exists() {
            warn!(job_id = %job.id, path = %job.spool_path.display(), "Spool file missing, rolling back");
            importer.rollback(&job).await?;
            mark_failed(importer, job, "upload spool missing after restart").await?;
            report.failed += 1;
            continue;
        }

        match importer.reset(&job).await {
            Ok(()) => {}
            Err(Error::DatasetNotFound(_)) => {
                mark_failed(importer, job, "dataset no longer exists").await?;
                report.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        }

        job.set_status(JobStatus::Queued);
        {
            let store = importer.storage().jobs.clone();
            let job = job.clone();
            blocking(move || store.put_job(&job)).await?;
        }
        info!(job_id = %job.id, dataset_id = job.dataset_id, "Re-queued unfinished import");
        queue.submit(job, guard).await?;
        report.requeued += 1;
    }
    Ok(report)
}

async fn mark_failed(importer: &Importer, mut job: ImportJob, reason: &str) -> Result<()> {
    importer.storage().spool.discard(&job.spool_path, Some(&job.id));
    job.fail(reason);
    let store = importer.storage().jobs.clone();
    blocking(move || store.put_job(&job)).await
}
