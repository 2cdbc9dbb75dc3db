use std::fmt;
use std::path::Path;

use crate::error::HashError;
use crate::hasher;
use crate::manifest::{self, Manifest};

/// Outcome of checking a file against its sidecar.
///
/// A changed file is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Size and digest both match the manifest.
    Unchanged,
    /// The file no longer matches the manifest.
    Modified(Change),
    /// No sidecar exists for the file.
    Missing,
}

/// Which part of the manifest no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Size { recorded: u64, actual: u64 },
    Content,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Size { recorded, actual } => {
                write!(f, "size changed ({recorded} -> {actual} bytes)")
            }
            Change::Content => f.write_str("content changed"),
        }
    }
}

impl Verification {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Verification::Unchanged)
    }
}

/// Check a file against its default sidecar.
pub fn verify(path: &Path) -> Result<Verification, HashError> {
    verify_with_progress(path, &manifest::sidecar_path(path), &|_, _| {})
}

/// Check a file against the sidecar at `sidecar`, reporting hashing progress.
///
/// A size mismatch returns immediately without reading the file's content.
pub fn verify_with_progress(
    path: &Path,
    sidecar: &Path,
    progress: &dyn Fn(u64, u64),
) -> Result<Verification, HashError> {
    if path.is_dir() {
        return Err(HashError::NotAFile(path.to_path_buf()));
    }
    if !sidecar.is_file() {
        return Ok(Verification::Missing);
    }
    let saved = manifest::read_manifest(sidecar)?;
    let current_size = hasher::regular_file_size(path)?;
    compare(path, &saved, current_size, progress)
}

fn compare(
    path: &Path,
    saved: &Manifest,
    current_size: u64,
    progress: &dyn Fn(u64, u64),
) -> Result<Verification, HashError> {
    if saved.file_size != current_size {
        return Ok(Verification::Modified(Change::Size {
            recorded: saved.file_size,
            actual: current_size,
        }));
    }

    let (_, digest) = hasher::hash_file(path, saved.algorithm, progress)?;
    if digest.bytes_read != saved.file_size {
        // Changed while being read
        return Ok(Verification::Modified(Change::Size {
            recorded: saved.file_size,
            actual: digest.bytes_read,
        }));
    }
    if digest.hex == saved.hex {
        Ok(Verification::Unchanged)
    } else {
        Ok(Verification::Modified(Change::Content))
    }
}
