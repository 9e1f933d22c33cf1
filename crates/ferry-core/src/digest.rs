//! Streaming content digests.
//!
//! One read pass over the file feeds every requested accumulator, so a run
//! that needs both the legacy hash and the cloud dedup hash still reads the
//! artifact exactly once.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use md5::Md5;
use sha2::{Digest, Sha512};
use sha3::Sha3_512;

/// Read block size for streaming digests.
pub const READ_BLOCK_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha512,
    Sha3_512,
    Md5,
}

impl DigestAlgorithm {
    /// Hash-type label used by the legacy metadata record.
    pub fn legacy_label(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha512 => "SHA_512",
            DigestAlgorithm::Sha3_512 => "SHA3_512",
            DigestAlgorithm::Md5 => "MD5",
        }
    }
}

/// Hex-encoded digests computed from the normalized artifact bytes.
/// Only the requested algorithms are populated; the set is all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSet {
    pub sha512: Option<String>,
    pub sha3_512: Option<String>,
    pub md5: Option<String>,
}

impl DigestSet {
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Sha512 => self.sha512.as_deref(),
            DigestAlgorithm::Sha3_512 => self.sha3_512.as_deref(),
            DigestAlgorithm::Md5 => self.md5.as_deref(),
        }
    }
}

/// Compute the requested digests of a file in a single streaming pass.
pub fn digest_file(path: &Path, algorithms: &[DigestAlgorithm]) -> anyhow::Result<DigestSet> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut sha512 = algorithms
        .contains(&DigestAlgorithm::Sha512)
        .then(Sha512::new);
    let mut sha3_512 = algorithms
        .contains(&DigestAlgorithm::Sha3_512)
        .then(Sha3_512::new);
    let mut md5 = algorithms.contains(&DigestAlgorithm::Md5).then(Md5::new);

    let mut buffer = vec![0u8; READ_BLOCK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if read == 0 {
            break;
        }
        let block = &buffer[..read];
        if let Some(hasher) = sha512.as_mut() {
            hasher.update(block);
        }
        if let Some(hasher) = sha3_512.as_mut() {
            hasher.update(block);
        }
        if let Some(hasher) = md5.as_mut() {
            hasher.update(block);
        }
    }

    Ok(DigestSet {
        sha512: sha512.map(|h| hex::encode(h.finalize())),
        sha3_512: sha3_512.map(|h| hex::encode(h.finalize())),
        md5: md5.map(|h| hex::encode(h.finalize())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_single_pass_matches_known_vectors() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let set = digest_file(
            file.path(),
            &[
                DigestAlgorithm::Sha512,
                DigestAlgorithm::Sha3_512,
                DigestAlgorithm::Md5,
            ],
        )
        .unwrap();

        assert_eq!(
            set.sha512.as_deref(),
            Some(
                "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                 2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
            )
        );
        assert_eq!(
            set.sha3_512.as_deref(),
            Some(
                "b751850b1a57168a5693cd924b6b096e08f621827444f70d884f5d0240d2712e\
                 10e116e9192af3c91a7ec57647e3934057340b4cf408d5a56592f8274eec53f0"
            )
        );
        assert_eq!(
            set.md5.as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_only_requested_algorithms_populated() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();

        let set = digest_file(file.path(), &[DigestAlgorithm::Sha3_512]).unwrap();
        assert!(set.sha3_512.is_some());
        assert!(set.sha512.is_none());
        assert!(set.md5.is_none());
    }

    #[test]
    fn test_large_file_spans_multiple_blocks() {
        let mut file = NamedTempFile::new().unwrap();
        let data = vec![0x5au8; READ_BLOCK_SIZE * 2 + 17];
        file.write_all(&data).unwrap();

        let streamed = digest_file(file.path(), &[DigestAlgorithm::Sha512]).unwrap();
        let direct = hex::encode(Sha512::digest(&data));
        assert_eq!(streamed.sha512.as_deref(), Some(direct.as_str()));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = digest_file(Path::new("/nonexistent/pkg.zip"), &[DigestAlgorithm::Sha512]);
        assert!(result.is_err());
    }
}
