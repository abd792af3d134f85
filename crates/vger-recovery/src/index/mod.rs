//! Sorted `hash -> container` index over a backup set.
//!
//! The index file holds one `"<base64 hash>, <container>"` line per record,
//! UTF-8, sorted by byte value. It is written once by [`build`] and only read
//! afterwards.

pub mod build;
pub mod lookup;
pub mod sort;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::ArchiveCache;
use crate::config::{IndexConfig, LookupMode};
use crate::error::{RecoveryError, Result};
use crate::fileset::split_blocklist;
use crate::hash::BlockHash;

pub use lookup::{Lookup, MemoryLookup, SparseLookup};

pub const SEPARATOR: &str = ", ";

pub fn format_line(hash: &str, container: &str) -> String {
    format!("{hash}{SEPARATOR}{container}")
}

/// Split an index line into `(hash, container)`.
pub fn parse_line(line: &str, line_no: u64) -> Result<(&str, &str)> {
    match line.split_once(SEPARATOR) {
        Some((hash, container)) if !hash.is_empty() && !container.is_empty() => {
            Ok((hash, container))
        }
        _ => Err(RecoveryError::IndexCorrupt {
            line: line_no,
            reason: format!("malformed record '{line}'"),
        }),
    }
}

/// Open the lookup structure `mode` asks for over the index at `path`.
pub fn open_lookup(path: &Path, config: &IndexConfig) -> Result<Lookup> {
    if !path.is_file() {
        return Err(RecoveryError::NoIndex(path.display().to_string()));
    }
    let size = std::fs::metadata(path)?.len();
    let mode = match config.lookup {
        LookupMode::Auto if size > config.memory_threshold_bytes => LookupMode::Sparse,
        LookupMode::Auto => LookupMode::Memory,
        other => other,
    };
    let lookup = match mode {
        LookupMode::Sparse => Lookup::Sparse(SparseLookup::build(path, config.sparse_samples)?),
        _ => Lookup::Memory(MemoryLookup::load(path)?),
    };
    info!(mode = lookup.kind(), bytes = size, "opened hash index");
    Ok(lookup)
}

/// Resolves block hashes to contents through the index and the container cache.
pub struct HashIndex {
    lookup: Lookup,
    cache: Arc<ArchiveCache>,
}

impl HashIndex {
    pub fn new(lookup: Lookup, cache: Arc<ArchiveCache>) -> Self {
        Self { lookup, cache }
    }

    pub fn open(path: &Path, config: &IndexConfig, cache: Arc<ArchiveCache>) -> Result<Self> {
        Ok(Self::new(open_lookup(path, config)?, cache))
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn cache(&self) -> &Arc<ArchiveCache> {
        &self.cache
    }

    /// Container holding `hash`.
    pub fn locate(&self, hash: &BlockHash) -> Result<String> {
        let encoded = hash.to_base64();
        self.lookup
            .locate(&encoded)?
            .ok_or(RecoveryError::HashNotFound(encoded))
    }

    /// Bytes of the block addressed by `hash`.
    pub fn read_hash(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        let container = self.locate(hash)?;
        self.cache.read_block(&container, hash)
    }

    /// Child hashes packed in the blocklist block `blocklist`.
    pub fn read_blocklist_hashes(
        &self,
        blocklist: &BlockHash,
        digest_len: usize,
    ) -> Result<Vec<BlockHash>> {
        split_blocklist(&self.read_hash(blocklist)?, digest_len)
    }
}
