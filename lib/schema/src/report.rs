use crate::detect::{detect, DEFAULT_SAMPLE_SIZE};
use revdata_core::FieldMapping;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Records echoed back in a preview
pub const SAMPLE_DATA_LEN: usize = 3;

/// Field-detection answer for an upload that is not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewReport {
    pub detected_fields: Vec<String>,
    pub sample_data: Vec<Value>,
    pub suggested_mapping: FieldMapping,
    pub item_count_estimate: usize,
}

impl PreviewReport {
    /// Build from already-normalized preview records
    pub fn from_records(records: &[Value], item_count_estimate: usize) -> Self {
        let detection = detect(records, DEFAULT_SAMPLE_SIZE);
        Self {
            detected_fields: detection.detected_fields,
            sample_data: records.iter().take(SAMPLE_DATA_LEN).cloned().collect(),
            suggested_mapping: detection.suggested_mapping,
            item_count_estimate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report() {
        let records: Vec<Value> = (0..5).map(|i| json!({"question": format!("q{i}"), "answer": "a"})).collect();
        let report = PreviewReport::from_records(&records, 5);
        assert_eq!(report.sample_data.len(), 3);
        assert_eq!(report.item_count_estimate, 5);
        assert_eq!(report.detected_fields, vec!["answer", "question"]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["suggested_mapping"]["display_mode"], "qa_pair");
    }
}
