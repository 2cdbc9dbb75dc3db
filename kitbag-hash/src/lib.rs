//! Tamper-evident sidecar manifests: record a file's size and content digest,
//! then check the file against that record later.

pub mod algorithm;
pub mod batch;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod verify;

pub use algorithm::{Digester, HashAlgorithm};
pub use batch::{FileReport, Outcome, check_all, generate_all};
pub use error::HashError;
pub use hasher::{StreamDigest, hash_reader, hash_reader_with_progress};
pub use manifest::{
    FORMAT_V1, Manifest, ManifestOptions, SIDECAR_SUFFIX, generate, generate_with_progress,
    read_manifest, sidecar_path, sidecar_path_with_suffix, strip_sidecar_suffix, write_manifest,
};
pub use verify::{Change, Verification, verify, verify_with_progress};
