//! Content hashing and hash verification.
//!
//! All digests are lowercase hex SHA-256. Comparison against externally
//! supplied digests ignores case and surrounding whitespace, since servers
//! and operators are not consistent about either.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::{BundleError, Result};

const BUFFER_SIZE: usize = 8192;

/// SHA-256 of a file, streamed in fixed-size chunks.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file).map(|(digest, _)| digest)
}

/// SHA-256 and byte count of everything `reader` yields.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// SHA-256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Case- and whitespace-insensitive digest comparison.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Hash `path` and compare against `expected`.
///
/// Returns the freshly computed digest on success.
pub fn verify_file(path: &Path, expected: &str) -> Result<String> {
    let actual = hash_file(path)?;
    if !digests_match(expected, &actual) {
        return Err(BundleError::ChecksumMismatch {
            subject: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        });
    }
    debug!(path = %path.display(), "Checksum verified");
    Ok(actual)
}

/// Writer adapter that hashes every byte on its way to `inner`.
///
/// Used to hash a download or an extracted entry in the same pass that
/// writes it, so the bytes are never read twice.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the inner writer, the digest and the byte count.
    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_empty() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_digests_match_ignores_case_and_whitespace() {
        assert!(digests_match(" ABCDEF\n", "abcdef"));
        assert!(!digests_match("abcdef", "abcdee"));
    }

    #[test]
    fn test_verify_file_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("update_1.2.0.tar.gz");
        std::fs::write(&path, b"not the package you expected").unwrap();

        let err = verify_file(&path, &"0".repeat(64)).unwrap_err();
        match err {
            BundleError::ChecksumMismatch { subject, actual, .. } => {
                assert_eq!(subject, "update_1.2.0.tar.gz");
                assert_eq!(actual.len(), 64);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hashing_writer_counts_bytes() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(writer.written(), 11);

        let (inner, digest, written) = writer.finish().unwrap();
        assert_eq!(inner, b"hello world");
        assert_eq!(written, 11);
        assert_eq!(digest, hash_bytes(b"hello world"));
    }

    proptest! {
        #[test]
        fn prop_chunked_writes_hash_like_whole(data in proptest::collection::vec(any::<u8>(), 0..4096), split in 0usize..4096) {
            let split = split.min(data.len());
            let mut writer = HashingWriter::new(io::sink());
            writer.write_all(&data[..split]).unwrap();
            writer.write_all(&data[split..]).unwrap();
            let (_, digest, written) = writer.finish().unwrap();

            prop_assert_eq!(written, data.len() as u64);
            prop_assert_eq!(digest, hash_bytes(&data));
        }

        #[test]
        fn prop_single_flipped_byte_changes_digest(data in proptest::collection::vec(any::<u8>(), 1..2048), idx in any::<prop::sample::Index>()) {
            let mut corrupted = data.clone();
            let i = idx.index(data.len());
            corrupted[i] ^= 0x01;
            prop_assert!(!digests_match(&hash_bytes(&data), &hash_bytes(&corrupted)));
        }
    }
}
