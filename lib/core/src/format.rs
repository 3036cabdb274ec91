use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Upload formats accepted by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Jsonl,
    Json,
    Csv,
    Tsv,
    /// Container only; holds one of the JSON formats
    Zip,
}

impl DataFormat {
    /// Sniff the format from a file name's extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self> {
        let lower = filename.to_lowercase();
        // `.jsonl` must be tested before `.json`
        let format = if lower.ends_with(".jsonl") {
            DataFormat::Jsonl
        } else if lower.ends_with(".json") {
            DataFormat::Json
        } else if lower.ends_with(".csv") {
            DataFormat::Csv
        } else if lower.ends_with(".tsv") {
            DataFormat::Tsv
        } else if lower.ends_with(".zip") {
            DataFormat::Zip
        } else {
            return Err(Error::UnsupportedFormat(format!(
                "'{}': upload a .jsonl, .json, .csv, .tsv or .zip file",
                filename
            )));
        };
        Ok(format)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::UnsupportedFormat(format!("{:?}", path)))?;
        Self::from_filename(name)
    }

    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Jsonl => "jsonl",
            DataFormat::Json => "json",
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Zip => "zip",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, DataFormat::Zip)
    }

    /// Field delimiter for the tabular formats
    #[inline]
    pub fn delimiter(&self) -> Option<u8> {
        match self {
            DataFormat::Csv => Some(b','),
            DataFormat::Tsv => Some(b'\t'),
            _ => None,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_extensions() {
        assert_eq!(DataFormat::from_filename("a.jsonl").unwrap(), DataFormat::Jsonl);
        assert_eq!(DataFormat::from_filename("A.JSON").unwrap(), DataFormat::Json);
        assert_eq!(DataFormat::from_filename("rows.csv").unwrap(), DataFormat::Csv);
        assert_eq!(DataFormat::from_filename("rows.tsv").unwrap(), DataFormat::Tsv);
        assert_eq!(DataFormat::from_filename("bundle.zip").unwrap(), DataFormat::Zip);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = DataFormat::from_filename("data.parquet").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(err.is_decode_error());
    }
}
