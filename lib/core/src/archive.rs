//! ZIP container handling.
//!
//! An uploaded archive is searched depth-first for the first `.jsonl` or
//! `.json` member: within a directory, files come before subdirectories and
//! both are visited in lexical order. `package.json` and anything under
//! `__MACOSX/` are ignored. The chosen member is extracted next to the upload
//! and decoded like a direct upload of that format.

use crate::{DataFormat, Error, Result};
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

const IGNORED_FILE: &str = "package.json";
const IGNORED_DIR: &str = "__MACOSX";

/// A data file unwrapped from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub format: DataFormat,
    /// Member name inside the archive
    pub entry_name: String,
}

fn is_candidate(name: &str) -> bool {
    let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
    let Some(file_name) = parts.last() else {
        return false;
    };
    if parts.iter().any(|p| *p == IGNORED_DIR) || *file_name == IGNORED_FILE {
        return false;
    }
    let lower = file_name.to_lowercase();
    lower.ends_with(".jsonl") || lower.ends_with(".json")
}

/// Depth-first walk order between two member paths
fn walk_order(a: &[&str], b: &[&str]) -> Ordering {
    let mut i = 0;
    loop {
        let a_is_file = i + 1 == a.len();
        let b_is_file = i + 1 == b.len();
        match (a_is_file, b_is_file) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        match a[i].cmp(b[i]) {
            Ordering::Equal if !a_is_file => i += 1,
            other => return other,
        }
    }
}

/// Pick the data member from a list of archive member names.
///
/// Directory entries (trailing `/`) are skipped. Returns the index into `names`.
pub fn locate_data_entry(names: &[String]) -> Option<usize> {
    let mut candidates: Vec<(usize, Vec<&str>)> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.ends_with('/') && is_candidate(n))
        .map(|(i, n)| (i, n.split('/').filter(|p| !p.is_empty()).collect()))
        .collect();
    candidates.sort_by(|(_, a), (_, b)| walk_order(a, b));
    candidates.first().map(|(i, _)| *i)
}

/// Extract the data member of `zip_path` into `dest_dir`.
///
/// Extraction stops with [`Error::Archive`] once more than `max_bytes` have
/// been written.
pub fn extract_data_file(zip_path: &Path, dest_dir: &Path, max_bytes: u64) -> Result<ExtractedFile> {
    let file = File::open(zip_path)?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| Error::Archive(format!("cannot open archive: {}", e)))?;

    let names: Vec<String> = (0..archive.len())
        .map(|i| {
            archive
                .by_index_raw(i)
                .map(|f| if f.is_dir() { format!("{}/", f.name().trim_end_matches('/')) } else { f.name().to_string() })
                .map_err(|e| Error::Archive(e.to_string()))
        })
        .collect::<Result<_>>()?;

    let index = locate_data_entry(&names).ok_or(Error::NoDataFile)?;
    let entry_name = names[index].clone();
    let format = DataFormat::from_filename(&entry_name)?;

    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::Archive(format!("cannot read '{}': {}", entry_name, e)))?;

    std::fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(format!("extracted.{}", format.extension()));
    let mut out = File::create(&target)?;
    let written = std::io::copy(&mut (&mut entry).take(max_bytes.saturating_add(1)), &mut out)?;
    if written > max_bytes {
        drop(out);
        let _ = std::fs::remove_file(&target);
        return Err(Error::Archive(format!(
            "'{}' expands beyond the {} byte limit",
            entry_name, max_bytes
        )));
    }

    debug!(entry = %entry_name, bytes = written, "Extracted data file from archive");
    Ok(ExtractedFile {
        path: target,
        format,
        entry_name,
    })
}

/// Resolve an upload to a decodable file, unwrapping archives into `work_dir`.
pub fn resolve_source(
    path: &Path,
    format: DataFormat,
    work_dir: &Path,
    max_extracted: u64,
) -> Result<(PathBuf, DataFormat)> {
    if format.is_container() {
        let extracted = extract_data_file(path, work_dir, max_extracted)?;
        Ok((extracted.path, extracted.format))
    } else {
        Ok((path.to_path_buf(), format))
    }
}
