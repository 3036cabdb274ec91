use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error at line {line_number}: {message} (line: {line})")]
    Parse {
        line_number: usize,
        line: String,
        message: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("No supported data file (.jsonl or .json) found in archive")]
    NoDataFile,

    #[error("Upload too large: limit is {limit} bytes, got at least {actual}")]
    UploadTooLarge { limit: u64, actual: u64 },

    #[error("Embedding API error: {0}")]
    EmbeddingApi(String),

    #[error("Unexpected embedding response format: {0}")]
    EmbeddingFormat(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(u64),

    #[error("Import job not found: {0}")]
    JobNotFound(String),

    #[error("An import is already active for dataset {0}")]
    ImportInProgress(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised while turning upload bytes into records.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. } | Error::UnsupportedFormat(_) | Error::Archive(_) | Error::NoDataFile
        )
    }

    /// Errors raised by the embedding service; the caller may retry these.
    pub fn is_embedding_error(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingApi(_) | Error::EmbeddingFormat(_) | Error::DimensionMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
