//! Service settings, read from an optional TOML file.
//!
//! ```toml
//! data_dir = "/var/lib/revdata"
//! http_port = 8080
//! max_upload_size = 209715200
//! workers = 4
//! ```
//!
//! Missing keys take their defaults; command line flags override the file.

use revdata_core::decode::DEFAULT_PREVIEW_LIMIT;
use revdata_ingest::{ImportSettings, DEFAULT_BATCH_SIZE, DEFAULT_MAX_EXTRACTED_SIZE};
use revdata_storage::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_UPLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_http_port() -> u16 {
    8000
}

fn default_max_upload_size() -> u64 {
    DEFAULT_MAX_UPLOAD_SIZE
}

fn default_upload_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_preview_limit() -> usize {
    DEFAULT_PREVIEW_LIMIT
}

fn default_max_extracted_size() -> u64 {
    DEFAULT_MAX_EXTRACTED_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Import worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    #[serde(default = "default_max_extracted_size")]
    pub max_extracted_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            max_upload_size: default_max_upload_size(),
            upload_chunk_size: default_upload_chunk_size(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            preview_limit: default_preview_limit(),
            max_extracted_size: default_max_extracted_size(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read `path`, or fall back to defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            batch_size: self.batch_size.max(1),
            max_extracted_size: self.max_extracted_size,
            preview_limit: self.preview_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml("http_port = 9000\nworkers = 4\n").unwrap();
        assert_eq!(settings.http_port, 9000);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(settings.batch_size, 1000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_toml("http_prot = 1\n").is_err());
    }

    #[test]
    fn test_missing_file_means_defaults() {
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }
}
