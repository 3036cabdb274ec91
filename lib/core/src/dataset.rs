use crate::{DataFormat, DedupConfig, FieldMapping};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type DatasetId = u64;

/// A raw or normalized record
pub type Record = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Importing,
    Ready,
    Reviewing,
    Completed,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub format: DataFormat,
    pub source_file: String,
    pub item_count: u64,
    /// Next sequence number to hand out; never decreases
    pub next_seq: u64,
    pub status: DatasetStatus,
    pub field_mapping: FieldMapping,
    pub dedup_config: DedupConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new dataset
#[derive(Debug, Clone, Default)]
pub struct NewDataset {
    pub name: String,
    pub description: Option<String>,
    pub source_file: String,
    pub format: Option<DataFormat>,
    pub field_mapping: Option<FieldMapping>,
    pub dedup_config: DedupConfig,
}

impl Dataset {
    /// A dataset in `importing` state with no items yet
    pub fn importing(id: DatasetId, new: NewDataset, format: DataFormat) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: new.name,
            description: new.description,
            format,
            source_file: new.source_file,
            item_count: 0,
            next_seq: 1,
            status: DatasetStatus::Importing,
            field_mapping: new.field_mapping.unwrap_or_default(),
            dedup_config: new.dedup_config,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Plain,
    Qa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub dataset_id: DatasetId,
    /// 1-based position within the dataset
    pub seq_num: u64,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub original_content: Record,
    pub current_content: Record,
    pub created_at: DateTime<Utc>,
}

impl DatasetItem {
    pub fn new(dataset_id: DatasetId, seq_num: u64, item_type: ItemType, content: Record) -> Self {
        Self {
            dataset_id,
            seq_num,
            item_type,
            status: ItemStatus::Pending,
            current_content: content.clone(),
            original_content: content,
            created_at: Utc::now(),
        }
    }
}
