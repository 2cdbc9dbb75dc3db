use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::algorithm::HashAlgorithm;
use crate::error::HashError;

const CHUNK_SIZE: usize = 64 * 1024; // 64 KB

/// Digest of a byte stream together with the number of bytes consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDigest {
    pub hex: String,
    pub bytes_read: u64,
}

/// Hash everything a reader yields, streaming in 64KB chunks.
pub fn hash_reader<R: Read>(
    reader: &mut R,
    algorithm: HashAlgorithm,
) -> Result<StreamDigest, HashError> {
    hash_reader_with_progress(reader, algorithm, 0, &|_, _| {})
}

/// Hash a reader with a progress callback.
/// The callback receives (bytes_processed, total_bytes); `total` is only
/// passed through for display.
pub fn hash_reader_with_progress<R: Read>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    total: u64,
    progress: &dyn Fn(u64, u64),
) -> Result<StreamDigest, HashError> {
    let mut digester = algorithm.digester();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut processed: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        digester.update(&buf[..n]);
        processed += n as u64;
        progress(processed, total);
    }

    Ok(StreamDigest {
        hex: digester.finalize_hex(),
        bytes_read: processed,
    })
}

/// Size of a regular file, rejecting directories and other non-files.
pub(crate) fn regular_file_size(path: &Path) -> Result<u64, HashError> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(HashError::NotAFile(path.to_path_buf()));
    }
    Ok(meta.len())
}

/// Open and hash a file on disk. Returns the size snapshot taken before
/// reading alongside the digest.
pub(crate) fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    progress: &dyn Fn(u64, u64),
) -> Result<(u64, StreamDigest), HashError> {
    let size = regular_file_size(path)?;
    let mut file = File::open(path)?;
    let digest = hash_reader_with_progress(&mut file, algorithm, size, progress)?;
    Ok((size, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Cursor;

    #[test]
    fn test_chunked_matches_single_update() {
        // Larger than one chunk so the loop runs several times
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();

        let mut direct = HashAlgorithm::Sha256.digester();
        direct.update(&data);
        let expected = direct.finalize_hex();

        let streamed = hash_reader(&mut Cursor::new(&data), HashAlgorithm::Sha256).unwrap();
        assert_eq!(streamed.hex, expected);
        assert_eq!(streamed.bytes_read, data.len() as u64);
    }

    #[test]
    fn test_progress_reports_running_total() {
        let data = vec![0x5Au8; CHUNK_SIZE + 10];
        let last = Cell::new(0u64);
        let calls = Cell::new(0u32);
        hash_reader_with_progress(
            &mut Cursor::new(&data),
            HashAlgorithm::Md5,
            data.len() as u64,
            &|done, total| {
                assert!(done > last.get());
                assert_eq!(total, data.len() as u64);
                last.set(done);
                calls.set(calls.get() + 1);
            },
        )
        .unwrap();
        assert_eq!(last.get(), data.len() as u64);
        assert!(calls.get() >= 2);
    }

    #[test]
    fn test_empty_reader() {
        let digest = hash_reader(&mut Cursor::new(Vec::new()), HashAlgorithm::Sha1).unwrap();
        assert_eq!(digest.bytes_read, 0);
        assert_eq!(digest.hex, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = regular_file_size(dir.path()).unwrap_err();
        assert!(matches!(err, HashError::NotAFile(_)));
    }
}
