use revdata_core::ItemType;
use serde_json::Value;

const QA_PAIRS: &[(&str, &str)] = &[
    ("instruction", "output"),
    ("question", "answer"),
    ("prompt", "completion"),
    ("input", "output"),
];

const CONVERSATION_KEYS: &[&str] = &["messages", "conversations"];

/// QA when a known question/answer pair or a conversation list is present
pub fn classify_item(record: &Value) -> ItemType {
    let Some(obj) = record.as_object() else {
        return ItemType::Plain;
    };
    let has_pair = QA_PAIRS
        .iter()
        .any(|(q, a)| obj.contains_key(*q) && obj.contains_key(*a));
    if has_pair || CONVERSATION_KEYS.iter().any(|k| obj.contains_key(*k)) {
        ItemType::Qa
    } else {
        ItemType::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify() {
        assert_eq!(classify_item(&json!({"question": "q", "answer": "a"})), ItemType::Qa);
        assert_eq!(classify_item(&json!({"input": "q", "output": "a"})), ItemType::Qa);
        assert_eq!(classify_item(&json!({"conversations": []})), ItemType::Qa);
        assert_eq!(classify_item(&json!({"question": "only half"})), ItemType::Plain);
        assert_eq!(classify_item(&json!({"text": "t"})), ItemType::Plain);
        assert_eq!(classify_item(&json!([1, 2])), ItemType::Plain);
    }
}
