// src/hash.rs

//! Hashing for artifact integrity and CAS blob addressing
//!
//! Capsule blob stores are addressed by one of two algorithms:
//!
//! | Algorithm | Directory name | Typical producer |
//! |-----------|----------------|------------------|
//! | SHA-256   | `sha256`       | Default for new capsules, artifact listings |
//! | BLAKE3    | `blake3`       | Fast re-packing of large corpora |
//!
//! Both produce 256-bit digests, rendered as 64 lowercase hex characters.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (cryptographic, default)
    #[default]
    Sha256,
    /// BLAKE3 (cryptographic, much faster on large inputs)
    Blake3,
}

impl HashAlgorithm {
    /// Hex length of a digest produced by this algorithm
    #[inline]
    pub const fn hex_len(&self) -> usize {
        64
    }

    /// Name used in `blobs/<name>/...` paths
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" | "b3" => Ok(Self::Blake3),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Hash string has wrong length for algorithm
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// Validate a hex digest for the given algorithm and return it lowercased
pub fn validate_hex(algorithm: HashAlgorithm, value: &str) -> Result<String, HashError> {
    if value.len() != algorithm.hex_len() {
        return Err(HashError::InvalidLength {
            expected: algorithm.hex_len(),
            got: value.len(),
        });
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HashError::InvalidHex(value.to_string()));
    }
    Ok(value.to_lowercase())
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    /// Finalize into a lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self.state {
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
            HasherState::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash everything a reader yields, returning the digest and byte count
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<(String, u64)> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        hasher.update(&buffer[..n]);
    }

    Ok((hasher.finalize_hex(), total))
}

/// SHA-256 hex digest
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_blake3_known_value() {
        // BLAKE3 of the empty input
        assert_eq!(
            hash_bytes(HashAlgorithm::Blake3, b""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
            let mut hasher = Hasher::new(algorithm);
            hasher.update(b"Hello, ");
            hasher.update(b"World!");
            assert_eq!(hasher.finalize_hex(), hash_bytes(algorithm, b"Hello, World!"));
        }
    }

    #[test]
    fn test_hash_reader_counts_bytes() {
        let data = vec![7u8; 20_000];
        let mut cursor = std::io::Cursor::new(&data);
        let (digest, size) = hash_reader(HashAlgorithm::Sha256, &mut cursor).unwrap();
        assert_eq!(size, 20_000);
        assert_eq!(digest, sha256(&data));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("BLAKE3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_validate_hex() {
        let upper = "DFFD6021BB2BD5B0AF676290809EC3A53191DD81C7F70A4B28688A362182986F";
        assert_eq!(
            validate_hex(HashAlgorithm::Sha256, upper).unwrap(),
            upper.to_lowercase()
        );
        assert!(matches!(
            validate_hex(HashAlgorithm::Sha256, "abc"),
            Err(HashError::InvalidLength { expected: 64, got: 3 })
        ));
        let bad = "g".repeat(64);
        assert!(matches!(
            validate_hex(HashAlgorithm::Blake3, &bad),
            Err(HashError::InvalidHex(_))
        ));
    }
}
