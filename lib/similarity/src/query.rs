use serde_json::Value;

const MESSAGES_KEY: &str = "messages";
const USER_ROLE: &str = "user";

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text a record is compared by.
///
/// Uses `query_field` when present, else the content of the first `user`
/// message, else every top-level string value joined by a space.
pub fn extract_query_text(record: &Value, query_field: &str) -> String {
    let Some(obj) = record.as_object() else {
        return render(record);
    };

    if let Some(value) = obj.get(query_field) {
        return render(value);
    }

    if let Some(Value::Array(messages)) = obj.get(MESSAGES_KEY) {
        let first_user = messages
            .iter()
            .filter_map(Value::as_object)
            .find(|m| m.get("role").and_then(Value::as_str) == Some(USER_ROLE));
        if let Some(message) = first_user {
            return message.get("content").map(render).unwrap_or_default();
        }
    }

    obj.values()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_field() {
        assert_eq!(extract_query_text(&json!({"question": "Q1", "answer": "A"}), "question"), "Q1");
        assert_eq!(extract_query_text(&json!({"question": 42}), "question"), "42");
        assert_eq!(extract_query_text(&json!({"question": ["a", 1]}), "question"), "[\"a\",1]");
    }

    #[test]
    fn test_first_user_message() {
        let record = json!({"messages": [
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hello there"},
            {"role": "user", "content": "second"}
        ]});
        assert_eq!(extract_query_text(&record, "question"), "hello there");
    }

    #[test]
    fn test_fallback_joins_strings_in_order() {
        let record = json!({"title": "T", "n": 5, "body": "B", "ok": true});
        assert_eq!(extract_query_text(&record, "question"), "T B");
        assert_eq!(extract_query_text(&json!({"messages": []}), "question"), "");
    }
}
