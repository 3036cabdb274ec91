//! Content normalization for uploaded records.
//!
//! Files exported from spreadsheets and chat tools often carry a BOM or
//! zero-width characters in their keys, so `"\u{feff}question"` and
//! `"question"` would otherwise be two different fields. Every key and string
//! value goes through [`normalize`] before anything else looks at a record.

use serde_json::{Map, Value};

/// Code points removed from keys and string values.
pub const INVISIBLE_CHARS: [char; 5] = [
    '\u{feff}', // byte order mark
    '\u{200b}', // zero width space
    '\u{200e}', // left-to-right mark
    '\u{200f}', // right-to-left mark
    '\u{00a0}', // no-break space
];

#[inline]
fn is_invisible(c: char) -> bool {
    INVISIBLE_CHARS.contains(&c)
}

/// Remove invisible characters, then trim surrounding whitespace.
pub fn strip_invisible(s: &str) -> String {
    if !s.contains(is_invisible) {
        return s.trim().to_string();
    }
    let cleaned: String = s.chars().filter(|c| !is_invisible(*c)).collect();
    cleaned.trim().to_string()
}

#[inline]
fn needs_cleaning(s: &str) -> bool {
    s.contains(is_invisible) || s.trim().len() != s.len()
}

/// Normalize a value recursively and return the result.
///
/// Mapping keys that collide after normalization keep the value that comes
/// last in iteration order.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_invisible(s)),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(strip_invisible(k), normalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Owned variant of [`normalize`]; strings that are already clean are kept.
pub fn normalize_in_place(value: &mut Value) {
    match value {
        Value::String(s) => {
            if needs_cleaning(s) {
                *s = strip_invisible(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_in_place),
        Value::Object(map) => {
            if map.keys().any(|k| needs_cleaning(k)) {
                let old = std::mem::take(map);
                for (k, mut v) in old {
                    normalize_in_place(&mut v);
                    let key = if needs_cleaning(&k) { strip_invisible(&k) } else { k };
                    map.insert(key, v);
                }
            } else {
                map.values_mut().for_each(normalize_in_place);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_invisible() {
        assert_eq!(strip_invisible("\u{feff}question"), "question");
        assert_eq!(strip_invisible("  a\u{200b}b \u{00a0}"), "ab");
        assert_eq!(strip_invisible("\u{200e}\u{200f}"), "");
        assert_eq!(strip_invisible("plain"), "plain");
    }

    #[test]
    fn test_normalize_nested() {
        let raw = json!({
            "\u{feff}question": " What?\u{200b} ",
            "meta": {"\u{200e}tags": ["\u{00a0}a", "b "], "n": 3, "ok": true, "none": null}
        });
        let expected = json!({
            "question": "What?",
            "meta": {"tags": ["a", "b"], "n": 3, "ok": true, "none": null}
        });
        assert_eq!(normalize(&raw), expected);
    }

    #[test]
    fn test_normalize_idempotent() {
        let raw = json!([
            {"\u{feff} k \u{200b}": ["\u{feff}", " x ", {"\u{00a0}y": "\u{200f}z"}]},
            "  \u{200b} padded",
            1.5,
        ]);
        let once = normalize(&raw);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_key_collision_last_write_wins() {
        let raw: Value = serde_json::from_str(r#"{"\ufeffq": "first", "q": "second"}"#).unwrap();
        assert_eq!(normalize(&raw), json!({"q": "second"}));
    }

    #[test]
    fn test_in_place_matches_pure() {
        let raw = json!({
            "\u{feff}question": " What? ",
            "clean": "value",
            "list": [{"\u{200b}a": " b"}],
        });
        let mut owned = raw.clone();
        normalize_in_place(&mut owned);
        assert_eq!(owned, normalize(&raw));
    }
}
