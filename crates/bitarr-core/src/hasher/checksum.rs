use crate::error::ParseEnumError;
use blake2::Blake2b512;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use twox_hash::XxHash64;

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
    XxHash64,
    Md5,
    Sha1,
    Blake2b,
}

/// Human-facing notes on an algorithm, shown by `bitarr algorithms`.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmInfo {
    pub description: &'static str,
    pub speed: &'static str,
    pub security: &'static str,
    pub recommendation: &'static str,
}

impl ChecksumAlgorithm {
    pub fn all() -> [ChecksumAlgorithm; 7] {
        [
            Self::Md5,
            Self::Sha1,
            Self::Sha256,
            Self::Sha512,
            Self::Blake2b,
            Self::XxHash64,
            Self::Blake3,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
            Self::XxHash64 => "xxhash64",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Blake2b => "blake2b",
        }
    }

    pub fn info(&self) -> AlgorithmInfo {
        match self {
            Self::Md5 => AlgorithmInfo {
                description: "Fast, but cryptographically broken",
                speed: "Very fast",
                security: "Low",
                recommendation: "Not recommended for security purposes",
            },
            Self::Sha1 => AlgorithmInfo {
                description: "Older algorithm with known weaknesses",
                speed: "Fast",
                security: "Medium-Low",
                recommendation: "Not recommended for security purposes",
            },
            Self::Sha256 => AlgorithmInfo {
                description: "Secure hash algorithm (SHA-2 family)",
                speed: "Medium",
                security: "High",
                recommendation: "Good balance of security and speed",
            },
            Self::Sha512 => AlgorithmInfo {
                description: "Secure hash algorithm with larger output (SHA-2 family)",
                speed: "Medium",
                security: "Very High",
                recommendation: "Good for high-security needs",
            },
            Self::Blake2b => AlgorithmInfo {
                description: "Modern cryptographic hash function",
                speed: "Fast",
                security: "High",
                recommendation: "Good balance of speed and security",
            },
            Self::XxHash64 => AlgorithmInfo {
                description: "Extremely fast non-cryptographic hash function",
                speed: "Extremely fast",
                security: "Low (not cryptographic)",
                recommendation: "Best for performance-critical scanning",
            },
            Self::Blake3 => AlgorithmInfo {
                description: "Latest generation hash function",
                speed: "Very fast",
                security: "High",
                recommendation: "Best balance of speed and security",
            },
        }
    }

    fn hasher(&self) -> IncrementalHasher {
        match self {
            Self::Sha256 => IncrementalHasher::Sha256(Sha256::new()),
            Self::Sha512 => IncrementalHasher::Sha512(Sha512::new()),
            Self::Blake3 => IncrementalHasher::Blake3(Box::new(blake3::Hasher::new())),
            Self::XxHash64 => IncrementalHasher::XxHash64(XxHash64::with_seed(0)),
            Self::Md5 => IncrementalHasher::Md5(Md5::new()),
            Self::Sha1 => IncrementalHasher::Sha1(Sha1::new()),
            Self::Blake2b => IncrementalHasher::Blake2b(Box::new(Blake2b512::new())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            "xxhash64" | "xxh64" => Ok(Self::XxHash64),
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "blake2b" => Ok(Self::Blake2b),
            _ => Err(ParseEnumError {
                kind: "checksum algorithm",
                value: s.to_string(),
            }),
        }
    }
}

enum IncrementalHasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
    XxHash64(XxHash64),
    Md5(Md5),
    Sha1(Sha1),
    Blake2b(Box<Blake2b512>),
}

impl IncrementalHasher {
    fn update(&mut self, block: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(block),
            Self::Sha512(h) => h.update(block),
            Self::Blake3(h) => {
                h.update(block);
            }
            Self::XxHash64(h) => h.write(block),
            Self::Md5(h) => h.update(block),
            Self::Sha1(h) => h.update(block),
            Self::Blake2b(h) => h.update(block),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::XxHash64(h) => format!("{:016x}", h.finish()),
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Blake2b(h) => hex::encode(h.finalize()),
        }
    }
}

/// A finished digest and the number of bytes that went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumOutput {
    pub digest: String,
    pub bytes_read: u64,
}

/// A single failed read attempt. The read is never retried.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("permission denied reading {}: {source}", .path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == ErrorKind::PermissionDenied {
            ReadError::Permission { path, source }
        } else {
            ReadError::Io { path, source }
        }
    }

    /// The `scan_errors.error_type` value for this failure.
    pub fn error_type(&self) -> &'static str {
        match self {
            ReadError::Permission { .. } => "permission_error",
            ReadError::Io { .. } => "io_error",
        }
    }
}

/// Stream `path` through `algorithm` in `block_size` chunks.
///
/// On any open or read failure nothing is returned but the error: a digest over a
/// prefix of the file would look like a content change on the next scan.
pub fn checksum_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    block_size: usize,
) -> Result<ChecksumOutput, ReadError> {
    let file = File::open(path).map_err(|e| ReadError::from_io(path, e))?;
    checksum_reader(file, algorithm, block_size).map_err(|e| ReadError::from_io(path, e))
}

pub fn checksum_reader<R: Read>(
    mut reader: R,
    algorithm: ChecksumAlgorithm,
    block_size: usize,
) -> io::Result<ChecksumOutput> {
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut bytes_read: u64 = 0;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
        bytes_read += n as u64;
    }

    Ok(ChecksumOutput {
        digest: hasher.finalize_hex(),
        bytes_read,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn digest_of(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
        checksum_reader(Cursor::new(data), algorithm, 7).unwrap().digest
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            digest_of(b"abc", ChecksumAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            digest_of(b"abc", ChecksumAlgorithm::Md5),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            digest_of(b"abc", ChecksumAlgorithm::Sha1),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            digest_of(b"", ChecksumAlgorithm::Blake3),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        assert_eq!(
            digest_of(b"", ChecksumAlgorithm::XxHash64),
            "ef46db3751d8e999"
        );
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(digest_of(b"x", ChecksumAlgorithm::Sha512).len(), 128);
        assert_eq!(digest_of(b"x", ChecksumAlgorithm::Blake2b).len(), 128);
        assert_eq!(digest_of(b"x", ChecksumAlgorithm::XxHash64).len(), 16);
    }

    #[test]
    fn test_block_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for algorithm in ChecksumAlgorithm::all() {
            let small = checksum_reader(Cursor::new(&data), algorithm, 3).unwrap();
            let large = checksum_reader(Cursor::new(&data), algorithm, DEFAULT_BLOCK_SIZE).unwrap();
            assert_eq!(small, large, "{algorithm} differs across block sizes");
            assert_eq!(small.bytes_read, data.len() as u64);
        }
    }

    #[test]
    fn test_algorithm_names_parse() {
        for algorithm in ChecksumAlgorithm::all() {
            assert_eq!(algorithm.as_str().parse::<ChecksumAlgorithm>().unwrap(), algorithm);
        }
        assert_eq!("SHA-256".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = checksum_file(&dir.path().join("nope"), ChecksumAlgorithm::Sha256, 1024)
            .unwrap_err();
        assert_eq!(err.error_type(), "io_error");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_permission_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        std::fs::write(&path, b"secret").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores file modes
        if File::open(&path).is_ok() {
            return;
        }
        let err = checksum_file(&path, ChecksumAlgorithm::Sha256, 1024).unwrap_err();
        assert_eq!(err.error_type(), "permission_error");
    }
}
