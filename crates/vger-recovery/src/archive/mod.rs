//! Single-file block containers.
//!
//! Layout follows the pack format: a 9-byte header, length-prefixed entry
//! payloads (tag-byte compressed), a MessagePack trailer listing every entry,
//! and the trailer length in the final 4 bytes.

mod reader;
mod writer;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compress::Compression;
use crate::error::Result;

pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Magic bytes at the start of every container.
pub const ARCHIVE_MAGIC: &[u8; 8] = b"VGERVOL\0";
pub const ARCHIVE_VERSION: u8 = 1;
/// Size of the container header (magic + version byte).
pub const ARCHIVE_HEADER_SIZE: usize = 9;

/// One trailer record describing a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    /// Offset of the payload (past its 4-byte length prefix).
    pub offset: u64,
    /// Stored (compressed) payload length.
    pub length: u32,
    /// Uncompressed size.
    pub size: u64,
    /// Last write time, unix seconds.
    pub mtime: i64,
}

/// A compression module able to read and write containers.
pub trait Codec: Send + Sync {
    /// Volume file name suffix (without the dot).
    fn extension(&self) -> &str;

    fn open_read(&self, path: &Path) -> Result<ArchiveReader>;

    fn open_write(&self, path: &Path) -> Result<ArchiveWriter>;
}

/// The built-in codec: pack-style containers with one compression setting.
#[derive(Debug, Clone, Copy)]
pub struct PackCodec {
    compression: Compression,
}

impl PackCodec {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl Codec for PackCodec {
    fn extension(&self) -> &str {
        self.compression.extension()
    }

    fn open_read(&self, path: &Path) -> Result<ArchiveReader> {
        // Entries carry their own compression tag, so any pack codec can read.
        ArchiveReader::open(path)
    }

    fn open_write(&self, path: &Path) -> Result<ArchiveWriter> {
        ArchiveWriter::create(path, self.compression)
    }
}

/// Look up the codec registered for a volume's compression extension.
pub fn codec_for_extension(extension: &str, zstd_level: i32) -> Option<Box<dyn Codec>> {
    let compression = match extension {
        "none" => Compression::None,
        "lz4" => Compression::Lz4,
        "zstd" => Compression::Zstd { level: zstd_level },
        _ => return None,
    };
    Some(Box::new(PackCodec::new(compression)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn registry_knows_builtin_codecs() {
        for ext in ["none", "lz4", "zstd"] {
            assert_eq!(codec_for_extension(ext, 3).unwrap().extension(), ext);
        }
        assert!(codec_for_extension("7z", 3).is_none());
    }

    #[test]
    fn write_then_read_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.dblock.zstd");
        let mtime = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let codec = codec_for_extension("zstd", 3).unwrap();
        let mut writer = codec.open_write(&path).unwrap();
        writer.add_entry("manifest", b"{}", mtime).unwrap();
        writer.add_entry("list/aa", &[1u8; 5000], mtime).unwrap();
        writer.add_entry("list/bb", b"", mtime).unwrap();
        let written = writer.finish().unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());

        let mut reader = codec.open_read(&path).unwrap();
        assert_eq!(reader.entries().len(), 3);
        let listed: Vec<&str> = reader
            .list_entries(Some("list/"))
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(listed, vec!["list/aa", "list/bb"]);
        assert_eq!(reader.read_entry("list/aa").unwrap(), vec![1u8; 5000]);
        assert!(reader.read_entry("list/bb").unwrap().is_empty());
        assert_eq!(reader.last_write_time("manifest"), Some(mtime));
        assert!(reader.contains("manifest"));
        assert!(!reader.contains("missing"));
    }

    #[test]
    fn duplicate_entry_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.dblock.none");
        let mut writer = ArchiveWriter::create(&path, Compression::None).unwrap();
        let now = Utc::now();
        writer.add_entry("a", b"1", now).unwrap();
        assert!(writer.add_entry("a", b"2", now).is_err());
    }

    #[test]
    fn unfinished_writer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.dblock.lz4");
        {
            let mut writer = ArchiveWriter::create(&path, Compression::Lz4).unwrap();
            writer.add_entry("a", b"1", Utc::now()).unwrap();
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn garbage_is_not_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.dblock.lz4");
        std::fs::write(&path, b"this is not a container at all").unwrap();
        assert!(ArchiveReader::open(&path).is_err());
        std::fs::write(&path, b"tiny").unwrap();
        assert!(ArchiveReader::open(&path).is_err());
    }
}
