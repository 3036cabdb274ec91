//! On-disk staging of uploads.
//!
//! Uploads are written chunk by chunk as they arrive and never held in
//! memory as a whole. The size limit is enforced while writing, so an
//! oversized upload is rejected before any of it is decoded.

use revdata_core::{DataFormat, Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// 100 MiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A completely written upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledUpload {
    pub path: PathBuf,
    /// Name the client sent
    pub filename: String,
    pub format: DataFormat,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct UploadSpool {
    dir: PathBuf,
    max_size: u64,
    chunk_size: usize,
}

/// Keep only the final path component and a conservative character set
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

impl UploadSpool {
    pub fn new<P: AsRef<Path>>(dir: P, max_size: u64, chunk_size: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_size,
            chunk_size: chunk_size.max(1),
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reject a declared length above the limit before reading any body
    pub fn check_declared_size(&self, declared: u64) -> Result<()> {
        if declared > self.max_size {
            return Err(Error::UploadTooLarge {
                limit: self.max_size,
                actual: declared,
            });
        }
        Ok(())
    }

    /// Open a spool file for `filename`; the format is sniffed from its extension
    pub fn create(&self, filename: &str) -> Result<SpoolWriter> {
        let format = DataFormat::from_filename(filename)?;
        let path = self
            .dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), sanitize_filename(filename)));
        let file = File::create(&path)?;
        Ok(SpoolWriter {
            path,
            filename: filename.to_string(),
            format,
            file: Some(file),
            written: 0,
            limit: self.max_size,
            hasher: Sha256::new(),
        })
    }

    /// Spool a whole reader in `chunk_size` pieces
    pub fn spool_reader<R: Read>(&self, filename: &str, mut reader: R) -> Result<SpooledUpload> {
        let mut writer = self.create(filename)?;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    writer.abort();
                    return Err(e.into());
                }
            };
            writer.write_chunk(&buf[..n])?;
        }
        writer.finish()
    }

    /// A scratch directory for one job, under the spool directory
    pub fn work_dir(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.work", job_id))
    }

    /// Best-effort removal of a spool file and its scratch directory
    pub fn discard(&self, path: &Path, job_id: Option<&str>) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove spool file");
            }
        }
        if let Some(id) = job_id {
            let work = self.work_dir(id);
            if work.exists() {
                if let Err(e) = std::fs::remove_dir_all(&work) {
                    warn!(path = %work.display(), error = %e, "Failed to remove work directory");
                }
            }
        }
    }
}

/// An upload being written
pub struct SpoolWriter {
    path: PathBuf,
    filename: String,
    format: DataFormat,
    file: Option<File>,
    written: u64,
    limit: u64,
    hasher: Sha256,
}

impl SpoolWriter {
    /// Append a chunk; past the limit the partial file is removed
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let total = self.written + chunk.len() as u64;
        if total > self.limit {
            self.abort();
            return Err(Error::UploadTooLarge {
                limit: self.limit,
                actual: total,
            });
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Storage("spool writer already closed".into()))?;
        if let Err(e) = file.write_all(chunk) {
            self.abort();
            return Err(e.into());
        }
        self.hasher.update(chunk);
        self.written = total;
        Ok(())
    }

    pub fn finish(mut self) -> Result<SpooledUpload> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        let sha256 = format!("{:x}", std::mem::take(&mut self.hasher).finalize());
        debug!(path = %self.path.display(), bytes = self.written, "Upload spooled");
        Ok(SpooledUpload {
            path: std::mem::take(&mut self.path),
            filename: std::mem::take(&mut self.filename),
            format: self.format,
            size: self.written,
            sha256,
        })
    }

    /// Drop the partial file
    pub fn abort(&mut self) {
        self.file.take();
        if !self.path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SpoolWriter {
    fn drop(&mut self) {
        // Unfinished writers leave nothing behind
        if self.file.is_some() {
            self.abort();
        }
    }
}
