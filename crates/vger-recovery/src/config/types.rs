use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::error::Result;

/// Recovery tool configuration. Every section is optional; an empty file
/// (or no file at all) yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Backup-set prefix to select when a folder holds more than one set.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub rechunk: RechunkConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on simultaneously open block containers.
    #[serde(default = "default_max_open_archives")]
    pub max_open_archives: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_open_archives: default_max_open_archives(),
        }
    }
}

/// How the hash index is consulted at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    /// Memory map for small index files, sparse table above the threshold.
    Auto,
    Memory,
    Sparse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_lookup_mode")]
    pub lookup: LookupMode,
    /// Number of sampled `(hash, offset)` pairs kept by the sparse table.
    #[serde(default = "default_sparse_samples")]
    pub sparse_samples: usize,
    /// Index files larger than this use the sparse table in `auto` mode.
    #[serde(default = "default_memory_threshold_bytes")]
    pub memory_threshold_bytes: u64,
    /// Index file name inside the volume folder.
    #[serde(default = "default_index_file_name")]
    pub file_name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lookup: default_lookup_mode(),
            sparse_samples: default_sparse_samples(),
            memory_threshold_bytes: default_memory_threshold_bytes(),
            file_name: default_index_file_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Lz4,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechunkConfig {
    /// Target size of newly written block volumes (e.g. "50MiB").
    #[serde(default = "default_volume_size")]
    pub volume_size: String,
}

impl Default for RechunkConfig {
    fn default() -> Self {
        Self {
            volume_size: default_volume_size(),
        }
    }
}

impl RechunkConfig {
    pub fn volume_size_bytes(&self) -> Result<u64> {
        parse_human_size(&self.volume_size)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub kdf: KdfConfig,
}

/// Argon2id cost parameters used when encrypting new volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    #[serde(default = "default_kdf_time_cost")]
    pub time_cost: u32,
    /// Memory cost in KiB.
    #[serde(default = "default_kdf_memory_cost")]
    pub memory_cost: u32,
    #[serde(default = "default_kdf_parallelism")]
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            time_cost: default_kdf_time_cost(),
            memory_cost: default_kdf_memory_cost(),
            parallelism: default_kdf_parallelism(),
        }
    }
}
