//! Generate or check manifests for many files, continuing past per-file
//! failures.
//!
//! Every input is normalized (a sidecar path addresses its protected file),
//! de-duplicated, and produces exactly one [`FileReport`]. A status line per
//! file goes to the `log` facade.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::HashError;
use crate::manifest::{self, Manifest, ManifestOptions};
use crate::verify::{self, Verification};

/// What happened to one input path.
#[derive(Debug)]
pub enum Outcome {
    /// A manifest was generated and written.
    Generated(Manifest),
    /// The file was checked against its sidecar.
    Checked(Verification),
    /// The path is a directory (or otherwise not a regular file).
    NotAFile,
    /// A sidecar already exists and `force` was not set.
    SidecarExists,
    /// Reading or writing failed; the rest of the batch still ran.
    Failed(HashError),
}

/// Result for a single (normalized) input path.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: Outcome,
}

impl FileReport {
    /// True for a freshly written manifest or an unchanged file.
    pub fn is_success(&self) -> bool {
        match &self.outcome {
            Outcome::Generated(_) => true,
            Outcome::Checked(v) => v.is_unchanged(),
            _ => false,
        }
    }
}

/// Normalize and de-duplicate input paths, preserving first-seen order.
fn unique_targets<I, P>(paths: I, suffix: &str) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for p in paths {
        let target = manifest::strip_sidecar_suffix(p.as_ref(), suffix);
        if seen.insert(target.clone()) {
            targets.push(target);
        }
    }
    targets
}

/// Generate and write a manifest for each path.
pub fn generate_all<I, P>(paths: I, options: &ManifestOptions) -> Vec<FileReport>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    unique_targets(paths, &options.suffix)
        .into_iter()
        .map(|path| {
            let outcome = generate_one(&path, options);
            match &outcome {
                Outcome::Generated(m) => log::info!("{}: {} {}", path.display(), m.algorithm, m.hex),
                Outcome::NotAFile => log::warn!("Skipping {}: not a file", path.display()),
                Outcome::SidecarExists => {
                    log::warn!("Skipping {}: hash already exists", path.display())
                }
                Outcome::Failed(e) => log::warn!("Failed to hash {}: {e}", path.display()),
                Outcome::Checked(_) => {}
            }
            FileReport { path, outcome }
        })
        .collect()
}

fn generate_one(path: &Path, options: &ManifestOptions) -> Outcome {
    if path.is_dir() {
        return Outcome::NotAFile;
    }
    let sidecar = manifest::sidecar_path_with_suffix(path, &options.suffix);
    if sidecar.is_file() && !options.force {
        return Outcome::SidecarExists;
    }
    let result = manifest::generate(path, options.algorithm)
        .and_then(|m| manifest::write_manifest(&m, &sidecar).map(|()| m));
    match result {
        Ok(m) => Outcome::Generated(m),
        Err(HashError::NotAFile(_)) => Outcome::NotAFile,
        Err(e) => Outcome::Failed(e),
    }
}

/// Check each path against its sidecar.
pub fn check_all<I, P>(paths: I, options: &ManifestOptions) -> Vec<FileReport>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    unique_targets(paths, &options.suffix)
        .into_iter()
        .map(|path| {
            let sidecar = manifest::sidecar_path_with_suffix(&path, &options.suffix);
            let outcome = match verify::verify_with_progress(&path, &sidecar, &|_, _| {}) {
                Ok(v) => Outcome::Checked(v),
                Err(HashError::NotAFile(_)) => Outcome::NotAFile,
                Err(e) => Outcome::Failed(e),
            };
            match &outcome {
                Outcome::Checked(Verification::Unchanged) => {
                    log::info!("OK: {} is unchanged", path.display())
                }
                Outcome::Checked(Verification::Modified(change)) => {
                    log::warn!("MODIFIED: {} ({change})", path.display())
                }
                Outcome::Checked(Verification::Missing) => {
                    log::warn!("MISSING: no hash found at {}", sidecar.display())
                }
                Outcome::NotAFile => log::warn!("Skipping {}: not a file", path.display()),
                Outcome::Failed(e) => log::warn!("Failed to check {}: {e}", path.display()),
                Outcome::Generated(_) | Outcome::SidecarExists => {}
            }
            FileReport { path, outcome }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_targets_collapses_sidecar_paths() {
        let targets = unique_targets(
            ["a.bin", "a.bin.MS2_hash", "b.bin", "a.bin"],
            manifest::SIDECAR_SUFFIX,
        );
        assert_eq!(targets, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
    }
}
