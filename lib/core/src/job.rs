use crate::{DataFormat, DatasetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Create,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Outcome counters of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendTally {
    pub total_in_file: u64,
    pub appended: u64,
    pub skipped_duplicates: u64,
    pub new_total: u64,
}

/// Durable record of a queued import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub dataset_id: DatasetId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub spool_path: PathBuf,
    pub filename: String,
    pub format: DataFormat,
    /// Dataset's `next_seq` when the job was submitted
    pub base_next_seq: u64,
    /// SHA-256 of the uploaded file, hex
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub outcome: Option<AppendTally>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn queued(
        dataset_id: DatasetId,
        kind: JobKind,
        spool_path: PathBuf,
        filename: String,
        format: DataFormat,
        base_next_seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            dataset_id,
            kind,
            status: JobStatus::Queued,
            spool_path,
            filename,
            format,
            base_next_seq,
            sha256: None,
            outcome: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_checksum(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self, outcome: AppendTally) {
        self.outcome = Some(outcome);
        self.error = None;
        self.set_status(JobStatus::Succeeded);
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
        self.set_status(JobStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = ImportJob::queued(1, JobKind::Append, "/tmp/x".into(), "x.jsonl".into(), DataFormat::Jsonl, 4);
        assert!(job.status.is_active());
        job.set_status(JobStatus::Running);
        assert!(job.status.is_active());
        job.fail("boom");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(!job.status.is_active());
    }

    #[test]
    fn test_ids_unique() {
        let a = ImportJob::queued(1, JobKind::Create, "/a".into(), "a.json".into(), DataFormat::Json, 1);
        let b = ImportJob::queued(1, JobKind::Create, "/a".into(), "a.json".into(), DataFormat::Json, 1);
        assert_ne!(a.id, b.id);
    }
}
