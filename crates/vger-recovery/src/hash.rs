use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use blake2::digest::consts::U32;
use blake2::Blake2b;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Result, RecoveryError};

type Blake2b256 = Blake2b<U32>;

/// Content hash algorithms accepted for blocks and whole files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake2b256,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake2b256 => "blake2b256",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Blake2b256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> BlockHash {
        let mut h = self.hasher();
        h.update(data);
        h.finish()
    }

    /// Hash a file's contents without loading it into memory.
    pub fn digest_file(self, path: &Path) -> Result<BlockHash> {
        let mut hasher = self.hasher();
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }

    pub fn hasher(self) -> StreamHasher {
        match self {
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake2b256 => StreamHasher::Blake2b256(Blake2b256::new()),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake2b256" | "blake2b" => Ok(HashAlgorithm::Blake2b256),
            other => Err(RecoveryError::Usage(format!(
                "unsupported hash algorithm: {other}"
            ))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hasher, used to hash restored files without buffering them.
pub enum StreamHasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake2b256(Blake2b256),
}

impl StreamHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
            StreamHasher::Blake2b256(h) => h.update(data),
        }
    }

    pub fn finish(self) -> BlockHash {
        match self {
            StreamHasher::Sha256(h) => BlockHash(h.finalize().to_vec()),
            StreamHasher::Sha512(h) => BlockHash(h.finalize().to_vec()),
            StreamHasher::Blake2b256(h) => BlockHash(h.finalize().to_vec()),
        }
    }
}

/// Raw digest of a block, blocklist or file.
///
/// Two textual forms exist: plain base64 (file lists and the hash index) and
/// URL-safe base64 (container entry names). Both keep `=` padding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub Vec<u8>);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn to_entry_name(&self) -> String {
        URL_SAFE.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        STANDARD
            .decode(s)
            .map(BlockHash)
            .map_err(|e| RecoveryError::InvalidFormat(format!("invalid base64 hash '{s}': {e}")))
    }

    pub fn from_entry_name(s: &str) -> Result<Self> {
        URL_SAFE
            .decode(s)
            .map(BlockHash)
            .map_err(|e| RecoveryError::InvalidFormat(format!("invalid entry name '{s}': {e}")))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_base64())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Translate a container entry name (URL-safe alphabet) to plain base64.
/// Pure character mapping; padding is preserved.
pub fn entry_name_to_base64(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

/// Inverse of [`entry_name_to_base64`].
pub fn base64_to_entry_name(hash: &str) -> String {
    hash.chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect()
}
