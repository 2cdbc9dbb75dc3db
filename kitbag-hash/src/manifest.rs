//! The hash manifest sidecar: a small JSON document recording a file's size
//! and content digest.
//!
//! ```json
//! {
//!   "format": "MainShortcuts2_hash_v1",
//!   "file": {"size": 1048576},
//!   "hash": {"type": "sha512", "hex": "<lowercase hex digest>"}
//! }
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithm::HashAlgorithm;
use crate::error::HashError;
use crate::hasher;

/// Format tag written into every sidecar. Readers reject any other value.
pub const FORMAT_V1: &str = "MainShortcuts2_hash_v1";

/// Suffix appended to a protected file's path to name its sidecar.
pub const SIDECAR_SUFFIX: &str = ".MS2_hash";

/// Size and digest of a protected file at generation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub file_size: u64,
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub hex: String,
}

/// Options shared by generation and batch checking.
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub algorithm: HashAlgorithm,
    pub suffix: String,
    /// Overwrite sidecars that already exist instead of skipping the file.
    pub force: bool,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            suffix: SIDECAR_SUFFIX.to_string(),
            force: false,
        }
    }
}

// On-disk envelope. Kept separate from `Manifest` so the format tag and the
// algorithm name are validated before anything is trusted.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestDoc {
    format: String,
    file: FileSection,
    hash: HashSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileSection {
    size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct HashSection {
    #[serde(rename = "type")]
    kind: String,
    hex: String,
}

impl Manifest {
    /// Serialize to the pretty-printed sidecar JSON.
    pub fn to_json(&self) -> Result<String, HashError> {
        let doc = ManifestDoc {
            format: FORMAT_V1.to_string(),
            file: FileSection {
                size: self.file_size,
            },
            hash: HashSection {
                kind: self.algorithm.name().to_string(),
                hex: self.hex.clone(),
            },
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parse sidecar JSON, rejecting unknown format tags and algorithms.
    pub fn from_json(contents: &str) -> Result<Self, HashError> {
        let value: serde_json::Value = serde_json::from_str(contents)?;
        match value.get("format").and_then(|f| f.as_str()) {
            Some(FORMAT_V1) => {}
            Some(other) => return Err(HashError::unknown_format(other)),
            None => return Err(HashError::unknown_format("<missing>")),
        }
        let doc: ManifestDoc = serde_json::from_value(value)?;
        Ok(Self {
            file_size: doc.file.size,
            algorithm: doc.hash.kind.parse()?,
            hex: doc.hash.hex,
        })
    }
}

/// Sidecar path for `file` using the default suffix.
pub fn sidecar_path(file: &Path) -> PathBuf {
    sidecar_path_with_suffix(file, SIDECAR_SUFFIX)
}

/// Sidecar path for `file`: the file's path with `suffix` appended.
pub fn sidecar_path_with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = file.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Strip any trailing sidecar suffixes (case-insensitive), so that a sidecar
/// path given by mistake addresses the protected file instead.
pub fn strip_sidecar_suffix(path: &Path, suffix: &str) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if suffix.is_empty() {
        return path.to_path_buf();
    }
    let mut end = s.len();
    while end >= suffix.len() {
        let start = end - suffix.len();
        if !s.is_char_boundary(start) || !s[start..end].eq_ignore_ascii_case(suffix) {
            break;
        }
        end = start;
    }
    PathBuf::from(&s[..end])
}

/// Read and validate a sidecar.
pub fn read_manifest(sidecar: &Path) -> Result<Manifest, HashError> {
    let contents = fs::read_to_string(sidecar)?;
    Manifest::from_json(&contents)
}

/// Write a sidecar atomically (temp file, then rename). An existing sidecar
/// is replaced; callers that want skip-if-exists check beforehand.
pub fn write_manifest(manifest: &Manifest, sidecar: &Path) -> Result<(), HashError> {
    let serialized = manifest.to_json()?;
    let mut tmp = sidecar.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serialized)?;
    if let Err(e) = fs::rename(&tmp, sidecar) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Hash a file and build its manifest.
pub fn generate(path: &Path, algorithm: HashAlgorithm) -> Result<Manifest, HashError> {
    generate_with_progress(path, algorithm, &|_, _| {})
}

/// Hash a file with a progress callback receiving (bytes_processed, total_bytes).
///
/// The size is captured before reading. If the stream ends up a different
/// length the file was modified mid-read and no manifest is produced.
pub fn generate_with_progress(
    path: &Path,
    algorithm: HashAlgorithm,
    progress: &dyn Fn(u64, u64),
) -> Result<Manifest, HashError> {
    let (file_size, digest) = hasher::hash_file(path, algorithm, progress)?;
    if digest.bytes_read != file_size {
        return Err(HashError::ChangedDuringRead {
            expected: file_size,
            actual: digest.bytes_read,
        });
    }
    log::debug!(
        "{}: {} {} ({} bytes)",
        path.display(),
        algorithm,
        digest.hex,
        file_size
    );
    Ok(Manifest {
        file_size,
        algorithm,
        hex: digest.hex,
    })
}
