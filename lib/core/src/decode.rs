//! Streaming record decoders.
//!
//! JSONL and CSV/TSV are read lazily, one line or row at a time, so callers
//! that only need a preview never touch the rest of the file. A JSON document
//! has to be parsed whole before its elements can be handed out.

use crate::{DataFormat, Error, Result};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Lazy sequence of raw records
pub type RecordIter = Box<dyn Iterator<Item = Result<Value>> + Send>;

/// Default number of records decoded for an upload preview
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

const MAX_ERROR_LINE_CHARS: usize = 200;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn excerpt(line: &str) -> String {
    if line.chars().count() <= MAX_ERROR_LINE_CHARS {
        line.to_string()
    } else {
        let mut s: String = line.chars().take(MAX_ERROR_LINE_CHARS).collect();
        s.push_str("...");
        s
    }
}

/// Decode a data file into a lazy record sequence.
///
/// Containers must be unwrapped first (see [`crate::archive::resolve_source`]).
pub fn decode_file(path: &Path, format: DataFormat) -> Result<RecordIter> {
    let file = File::open(path)?;
    decode_reader(BufReader::new(file), format)
}

/// Decode from any buffered reader
pub fn decode_reader<R: BufRead + Send + 'static>(reader: R, format: DataFormat) -> Result<RecordIter> {
    match format {
        DataFormat::Jsonl => Ok(Box::new(JsonlRecords::new(reader))),
        DataFormat::Json => decode_json(reader),
        DataFormat::Csv | DataFormat::Tsv => {
            let delimiter = format.delimiter().unwrap_or(b',');
            Ok(Box::new(DelimitedRecords::new(reader, delimiter)?))
        }
        DataFormat::Zip => Err(Error::UnsupportedFormat(
            "zip archives must be unwrapped before decoding".to_string(),
        )),
    }
}

/// Decode at most `limit` records without reading past them
pub fn preview_file(path: &Path, format: DataFormat, limit: usize) -> Result<Vec<Value>> {
    decode_file(path, format)?.take(limit).collect()
}

/// Cheap record count used for upload feedback
pub fn estimate_count(path: &Path, format: DataFormat) -> Result<usize> {
    match format {
        DataFormat::Jsonl => {
            let reader = BufReader::new(File::open(path)?);
            let mut count = 0;
            for line in reader.split(b'\n') {
                let line = line?;
                if line.iter().any(|b| !b.is_ascii_whitespace()) {
                    count += 1;
                }
            }
            Ok(count)
        }
        DataFormat::Json => Ok(decode_file(path, format)?.count()),
        DataFormat::Csv | DataFormat::Tsv => {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(format.delimiter().unwrap_or(b','))
                .flexible(true)
                .has_headers(true)
                .from_path(path)
                .map_err(csv_error)?;
            Ok(reader.byte_records().filter(|r| r.is_ok()).count())
        }
        DataFormat::Zip => Err(Error::UnsupportedFormat(
            "zip archives must be unwrapped before counting".to_string(),
        )),
    }
}

/// One JSON value per non-blank line
struct JsonlRecords<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
    done: bool,
}

impl<R: BufRead> JsonlRecords<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for JsonlRecords<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let next = self.lines.next()?;
            self.line_number += 1;
            let line = match next {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::Parse {
                        line_number: self.line_number,
                        line: String::new(),
                        message: e.to_string(),
                    }));
                }
            };
            let text = if self.line_number == 1 {
                line.trim_start_matches('\u{feff}')
            } else {
                line.as_str()
            };
            if text.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(text).map_err(|e| {
                self.done = true;
                Error::Parse {
                    line_number: self.line_number,
                    line: excerpt(text),
                    message: e.to_string(),
                }
            }));
        }
    }
}

fn decode_json<R: Read>(mut reader: R) -> Result<RecordIter> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

    let value: Value = serde_json::from_slice(body).map_err(|e| {
        let line_number = e.line();
        let line = body
            .split(|b| *b == b'\n')
            .nth(line_number.saturating_sub(1))
            .map(|l| excerpt(&String::from_utf8_lossy(l)))
            .unwrap_or_default();
        Error::Parse {
            line_number,
            line,
            message: e.to_string(),
        }
    })?;

    match value {
        Value::Array(items) => Ok(Box::new(items.into_iter().map(Ok))),
        other => Ok(Box::new(std::iter::once(Ok(other)))),
    }
}

fn csv_error(e: csv::Error) -> Error {
    let line_number = e.position().map(|p| p.line() as usize).unwrap_or(0);
    Error::Parse {
        line_number,
        line: String::new(),
        message: e.to_string(),
    }
}

/// Header-keyed rows of a CSV or TSV file; every value is a string
struct DelimitedRecords<R> {
    headers: Vec<String>,
    rows: csv::StringRecordsIntoIter<R>,
    done: bool,
}

impl<R: Read> DelimitedRecords<R> {
    fn new(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.to_string())
            .collect();
        Ok(Self {
            headers,
            rows: reader.into_records(),
            done: false,
        })
    }
}

impl<R: Read> Iterator for DelimitedRecords<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.next()? {
            Ok(row) => {
                // Extra cells beyond the header are dropped; missing cells stay absent
                let mut map = Map::with_capacity(self.headers.len());
                for (key, cell) in self.headers.iter().zip(row.iter()) {
                    map.insert(key.clone(), Value::String(cell.to_string()));
                }
                Some(Ok(Value::Object(map)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(csv_error(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn decode_str(content: &str, format: DataFormat) -> Result<Vec<Value>> {
        decode_reader(Cursor::new(content.as_bytes().to_vec()), format)?.collect()
    }

    #[test]
    fn test_jsonl_in_order_skipping_blank_lines() {
        let content = "{\"q\":\"1\"}\n\n   \n{\"q\":\"2\"}\n{\"q\":\"3\"}";
        let records = decode_str(content, DataFormat::Jsonl).unwrap();
        assert_eq!(records, vec![json!({"q":"1"}), json!({"q":"2"}), json!({"q":"3"})]);
    }

    #[test]
    fn test_jsonl_malformed_line_reports_line() {
        let content = "{\"q\":\"1\"}\n{\"q\": broken}\n{\"q\":\"3\"}";
        let err = decode_str(content, DataFormat::Jsonl).unwrap_err();
        match err {
            Error::Parse { line_number, line, .. } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "{\"q\": broken}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_jsonl_leading_bom() {
        let content = "\u{feff}{\"q\":\"1\"}\n";
        let records = decode_str(content, DataFormat::Jsonl).unwrap();
        assert_eq!(records, vec![json!({"q":"1"})]);
    }

    #[test]
    fn test_json_array_and_singleton() {
        let records = decode_str(r#"[{"a":1},{"a":2}]"#, DataFormat::Json).unwrap();
        assert_eq!(records.len(), 2);

        let records = decode_str(r#"{"a":1}"#, DataFormat::Json).unwrap();
        assert_eq!(records, vec![json!({"a":1})]);
    }

    #[test]
    fn test_json_parse_error() {
        let err = decode_str("[{\"a\":1},\n{\"a\":}]", DataFormat::Json).unwrap_err();
        assert!(matches!(err, Error::Parse { line_number: 2, .. }));
    }

    #[test]
    fn test_csv_rows_are_strings() {
        let content = "question,answer,score\nQ1,A1,5\n\"Q, 2\",A2,true\n";
        let records = decode_str(content, DataFormat::Csv).unwrap();
        assert_eq!(
            records,
            vec![
                json!({"question":"Q1","answer":"A1","score":"5"}),
                json!({"question":"Q, 2","answer":"A2","score":"true"}),
            ]
        );
    }

    #[test]
    fn test_tsv_and_ragged_rows() {
        let content = "a\tb\tc\n1\t2\n1\t2\t3\t4\n";
        let records = decode_str(content, DataFormat::Tsv).unwrap();
        assert_eq!(records[0], json!({"a":"1","b":"2"}));
        assert_eq!(records[1], json!({"a":"1","b":"2","c":"3"}));
    }

    #[test]
    fn test_empty_inputs_yield_no_records() {
        assert!(decode_str("", DataFormat::Jsonl).unwrap().is_empty());
        assert!(decode_str("[]", DataFormat::Json).unwrap().is_empty());
        assert!(decode_str("question,answer\n", DataFormat::Csv).unwrap().is_empty());
        assert!(decode_str("", DataFormat::Tsv).unwrap().is_empty());
    }

    #[test]
    fn test_preview_stops_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jsonl");
        let mut content = String::new();
        for i in 0..50 {
            content.push_str(&format!("{{\"i\":{}}}\n", i));
        }
        // A broken tail is never reached by the preview
        content.push_str("not json\n");
        std::fs::write(&path, content).unwrap();

        let preview = preview_file(&path, DataFormat::Jsonl, 10).unwrap();
        assert_eq!(preview.len(), 10);
        assert_eq!(preview[9], json!({"i": 9}));
        assert_eq!(estimate_count(&path, DataFormat::Jsonl).unwrap(), 51);
    }

    #[test]
    fn test_zip_is_rejected_by_decoder() {
        let err = decode_str("", DataFormat::Zip).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
