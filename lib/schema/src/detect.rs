//! Role inference over sampled record keys

use ahash::AHashSet;
use revdata_core::{DisplayMode, FieldMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Records inspected by default
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

const QUESTION_CANDIDATES: &[&str] = &["instruction", "question", "prompt", "input", "query", "user", "human"];
const ANSWER_CANDIDATES: &[&str] = &["output", "answer", "completion", "response", "assistant", "bot", "reply"];
const THINKING_CANDIDATES: &[&str] = &["thinking", "reasoning", "thought", "chain_of_thought", "cot", "rationale"];
const CONTEXT_CANDIDATES: &[&str] = &["system", "system_prompt", "context", "instruction_prefix"];
const MESSAGES_CANDIDATES: &[&str] = &["messages", "conversations", "dialogue", "chat", "turns"];
const IMAGE_CANDIDATES: &[&str] = &["image", "images", "img", "imgs", "picture", "pictures"];

/// Keys seen in the sample and the mapping suggested for them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDetection {
    pub detected_fields: Vec<String>,
    pub suggested_mapping: FieldMapping,
}

/// Top-level keys of the first `sample_size` mapping-typed records, sorted
pub fn sample_keys(records: &[Value], sample_size: usize) -> BTreeSet<String> {
    records
        .iter()
        .take(sample_size)
        .filter_map(Value::as_object)
        .flat_map(|obj| obj.keys().cloned())
        .collect()
}

fn pick(candidates: &[&str], detected: &BTreeSet<String>, taken: &mut AHashSet<String>) -> Option<String> {
    let found = candidates
        .iter()
        .copied()
        .find(|c| detected.contains(*c) && !taken.contains(*c))
        .map(str::to_string)?;
    taken.insert(found.clone());
    Some(found)
}

/// Infer a field mapping from the first `sample_size` records.
///
/// Categories are filled in a fixed order and a key claimed by one category
/// is not offered to a later one.
pub fn detect(records: &[Value], sample_size: usize) -> FieldDetection {
    let detected = sample_keys(records, sample_size);
    let mut taken = AHashSet::new();

    let question_field = pick(QUESTION_CANDIDATES, &detected, &mut taken);
    let answer_field = pick(ANSWER_CANDIDATES, &detected, &mut taken);
    let thinking_field = pick(THINKING_CANDIDATES, &detected, &mut taken);
    let context_field = pick(CONTEXT_CANDIDATES, &detected, &mut taken);
    let messages_field = pick(MESSAGES_CANDIDATES, &detected, &mut taken);
    let image_field = pick(IMAGE_CANDIDATES, &detected, &mut taken);

    let display_mode = if messages_field.is_some() {
        DisplayMode::Conversation
    } else if question_field.is_some() && answer_field.is_some() {
        DisplayMode::QaPair
    } else {
        DisplayMode::Plain
    };

    let metadata_fields = detected.iter().filter(|k| !taken.contains(*k)).cloned().collect();
    let detected_fields: Vec<String> = detected.into_iter().collect();

    FieldDetection {
        suggested_mapping: FieldMapping {
            question_field,
            answer_field,
            thinking_field,
            context_field,
            messages_field,
            image_field,
            metadata_fields,
            display_mode,
            detected_fields: detected_fields.clone(),
            ..Default::default()
        },
        detected_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instruction_output() {
        let records = vec![json!({"instruction": "Summarize", "output": "Done", "id": 1})];
        let d = detect(&records, DEFAULT_SAMPLE_SIZE);
        let m = &d.suggested_mapping;
        assert_eq!(m.question_field.as_deref(), Some("instruction"));
        assert_eq!(m.answer_field.as_deref(), Some("output"));
        assert_eq!(m.display_mode, DisplayMode::QaPair);
        assert_eq!(m.metadata_fields, vec!["id"]);
        assert_eq!(d.detected_fields, vec!["id", "instruction", "output"]);
    }

    #[test]
    fn test_messages_means_conversation() {
        let records = vec![json!({"messages": [{"role": "user", "content": "hi"}], "lang": "en"})];
        let m = detect(&records, DEFAULT_SAMPLE_SIZE).suggested_mapping;
        assert_eq!(m.messages_field.as_deref(), Some("messages"));
        assert_eq!(m.display_mode, DisplayMode::Conversation);
        assert!(m.question_field.is_none());
    }

    #[test]
    fn test_messages_win_over_question_answer() {
        let records = vec![json!({
            "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
            "question": "q",
            "answer": "a"
        })];
        let m = detect(&records, DEFAULT_SAMPLE_SIZE).suggested_mapping;
        assert_eq!(m.messages_field.as_deref(), Some("messages"));
        assert_eq!(m.display_mode, DisplayMode::Conversation);
    }

    #[test]
    fn test_plain_text() {
        let records = vec![json!({"text": "lorem ipsum"})];
        let m = detect(&records, DEFAULT_SAMPLE_SIZE).suggested_mapping;
        assert_eq!(m.display_mode, DisplayMode::Plain);
        assert_eq!(m.metadata_fields, vec!["text"]);
    }

    #[test]
    fn test_candidate_order_wins() {
        // `instruction` precedes `question` in the candidate list
        let records = vec![json!({"question": "q", "instruction": "i", "answer": "a"})];
        let m = detect(&records, DEFAULT_SAMPLE_SIZE).suggested_mapping;
        assert_eq!(m.question_field.as_deref(), Some("instruction"));
        assert!(m.metadata_fields.contains(&"question".to_string()));
    }

    #[test]
    fn test_roles_mutually_exclusive() {
        let records = vec![json!({"system": "be nice", "user": "hi", "assistant": "hello"})];
        let m = detect(&records, DEFAULT_SAMPLE_SIZE).suggested_mapping;
        assert_eq!(m.question_field.as_deref(), Some("user"));
        assert_eq!(m.answer_field.as_deref(), Some("assistant"));
        assert_eq!(m.context_field.as_deref(), Some("system"));
        assert!(m.metadata_fields.is_empty());
        for role in m.role_fields() {
            assert!(!m.metadata_fields.iter().any(|f| f == role));
        }
    }

    #[test]
    fn test_sample_window_and_non_objects() {
        let mut records: Vec<Value> = (0..10).map(|_| json!({"text": "x"})).collect();
        records.insert(0, json!("bare string"));
        records.push(json!({"late_key": 1}));
        let d = detect(&records, 10);
        assert_eq!(d.detected_fields, vec!["text"]);
    }

    #[test]
    fn test_empty_input() {
        let d = detect(&[], DEFAULT_SAMPLE_SIZE);
        assert!(d.detected_fields.is_empty());
        assert_eq!(d.suggested_mapping.display_mode, DisplayMode::Plain);
    }
}
