//! JSON documents stored inside containers: the manifest, the file list of a
//! backup generation and the per-volume block lists of index containers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::{RecoveryError, Result};
use crate::hash::{BlockHash, HashAlgorithm};

pub const MANIFEST_ENTRY: &str = "manifest";
pub const FILELIST_ENTRY: &str = "filelist.json";
/// Index container entry prefix for per-block-volume descriptions.
pub const VOL_PREFIX: &str = "vol/";
/// Index container entry prefix for blocklist copies.
pub const LIST_PREFIX: &str = "list/";

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub blocksize: u64,
    pub block_hash: HashAlgorithm,
    pub file_hash: HashAlgorithm,
    pub app_version: String,
}

impl Manifest {
    pub fn new(blocksize: u64, block_hash: HashAlgorithm, file_hash: HashAlgorithm) -> Self {
        Self {
            version: MANIFEST_VERSION,
            created: Utc::now(),
            blocksize,
            block_hash,
            file_hash,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Child hashes that fit in one blocklist block.
    pub fn hashes_per_block(&self) -> u64 {
        self.blocksize / self.block_hash.digest_len() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.blocksize == 0 || self.hashes_per_block() == 0 {
            return Err(RecoveryError::InvalidFormat(format!(
                "manifest block size {} is too small for {}",
                self.blocksize, self.block_hash
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Folder,
    Symlink,
}

/// One path recorded in a backup generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub path: String,
    /// Whole-file hash (file hash algorithm).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub time: DateTime<Utc>,
    /// Block holding the serialized metadata of this path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metahash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metasize: Option<u64>,
    /// The single content block, when it differs from `hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    /// Blocklist hashes of a multi-block file, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklists: Option<Vec<String>>,
}

/// Where the content of a file entry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Empty,
    Single(String),
    Blocklists(Vec<String>),
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn content(&self) -> Result<FileContent> {
        if self.size == 0 {
            return Ok(FileContent::Empty);
        }
        if let Some(lists) = self.blocklists.as_ref().filter(|l| !l.is_empty()) {
            return Ok(FileContent::Blocklists(lists.clone()));
        }
        self.blockhash
            .clone()
            .or_else(|| self.hash.clone())
            .map(FileContent::Single)
            .ok_or_else(|| {
                RecoveryError::InvalidFormat(format!("file '{}' has no content hash", self.path))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: String,
    pub size: u64,
}

/// The `vol/<dblock name>` entry of an index container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVolume {
    pub blocks: Vec<BlockRef>,
    pub volumehash: String,
    pub volumesize: u64,
}

/// Index container entry name for a blocklist.
pub fn list_entry_name(blocklist: &BlockHash) -> String {
    format!("{LIST_PREFIX}{}", blocklist.to_entry_name())
}

pub fn vol_entry_name(volume: &str) -> String {
    format!("{VOL_PREFIX}{volume}")
}

pub fn read_manifest(reader: &mut ArchiveReader) -> Result<Manifest> {
    let raw = reader.read_entry(MANIFEST_ENTRY)?;
    let manifest: Manifest = serde_json::from_slice(&raw)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn write_manifest(
    writer: &mut ArchiveWriter,
    manifest: &Manifest,
    mtime: DateTime<Utc>,
) -> Result<()> {
    writer.add_entry(MANIFEST_ENTRY, &serde_json::to_vec(manifest)?, mtime)
}

pub fn read_filelist(reader: &mut ArchiveReader) -> Result<Vec<FileEntry>> {
    let raw = reader.read_entry(FILELIST_ENTRY)?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn write_filelist(
    writer: &mut ArchiveWriter,
    files: &[FileEntry],
    mtime: DateTime<Utc>,
) -> Result<()> {
    writer.add_entry(FILELIST_ENTRY, &serde_json::to_vec(files)?, mtime)
}

/// Split raw blocklist bytes into child hashes of `digest_len` bytes each.
pub fn split_blocklist(raw: &[u8], digest_len: usize) -> Result<Vec<BlockHash>> {
    if digest_len == 0 || raw.len() % digest_len != 0 {
        return Err(RecoveryError::InvalidFormat(format!(
            "blocklist of {} bytes is not a multiple of the {digest_len}-byte hash size",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(digest_len)
        .map(|c| BlockHash(c.to_vec()))
        .collect())
}

/// Pack child hashes into blocklist bytes.
pub fn join_blocklist<'a>(hashes: impl IntoIterator<Item = &'a BlockHash>) -> Vec<u8> {
    let mut out = Vec::new();
    for h in hashes {
        out.extend_from_slice(h.as_bytes());
    }
    out
}
