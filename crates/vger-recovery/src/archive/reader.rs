use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{EntryRecord, ARCHIVE_HEADER_SIZE, ARCHIVE_MAGIC, ARCHIVE_VERSION};
use crate::compress;
use crate::error::{RecoveryError, Result};

/// An open container. Holds the file handle for the lifetime of the reader.
pub struct ArchiveReader {
    path: PathBuf,
    file: BufReader<File>,
    entries: Vec<EntryRecord>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < (ARCHIVE_HEADER_SIZE + 4) as u64 {
            return Err(RecoveryError::InvalidFormat(format!(
                "container too small: {}",
                path.display()
            )));
        }

        let mut header = [0u8; ARCHIVE_HEADER_SIZE];
        file.read_exact(&mut header)?;
        if &header[..8] != ARCHIVE_MAGIC {
            return Err(RecoveryError::InvalidFormat(format!(
                "invalid container magic: {}",
                path.display()
            )));
        }
        if header[8] != ARCHIVE_VERSION {
            return Err(RecoveryError::InvalidFormat(format!(
                "unsupported container version {}",
                header[8]
            )));
        }

        // Trailer length from the last 4 bytes
        file.seek(SeekFrom::End(-4))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let trailer_len = u32::from_le_bytes(len_buf) as u64;
        let body_end = file_len - 4;
        if trailer_len > body_end - ARCHIVE_HEADER_SIZE as u64 {
            return Err(RecoveryError::InvalidFormat(
                "invalid container trailer length".into(),
            ));
        }
        let trailer_start = body_end - trailer_len;
        file.seek(SeekFrom::Start(trailer_start))?;
        let mut trailer = vec![0u8; trailer_len as usize];
        file.read_exact(&mut trailer)?;
        let entries: Vec<EntryRecord> = rmp_serde::from_slice(&trailer)?;

        let mut by_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.offset + entry.length as u64 > trailer_start {
                return Err(RecoveryError::InvalidFormat(format!(
                    "entry '{}' extends past the container body",
                    entry.name
                )));
            }
            by_name.insert(entry.name.clone(), i);
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            entries,
            by_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    /// Entries in stored order, optionally restricted to a name prefix.
    pub fn list_entries<'a>(
        &'a self,
        prefix: Option<&'a str>,
    ) -> impl Iterator<Item = &'a EntryRecord> + 'a {
        self.entries
            .iter()
            .filter(move |e| prefix.map_or(true, |p| e.name.starts_with(p)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn last_write_time(&self, name: &str) -> Option<DateTime<Utc>> {
        let entry = &self.entries[*self.by_name.get(name)?];
        DateTime::from_timestamp(entry.mtime, 0)
    }

    /// Read and decompress one entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| RecoveryError::EntryNotFound {
                container: self.path.display().to_string(),
                entry: name.to_string(),
            })?;
        let (offset, length, size) = {
            let e = &self.entries[idx];
            (e.offset, e.length, e.size)
        };
        self.file.seek(SeekFrom::Start(offset))?;
        let mut stored = vec![0u8; length as usize];
        self.file.read_exact(&mut stored)?;
        let data = compress::decompress_with_hint(&stored, Some(size as usize))?;
        if data.len() as u64 != size {
            return Err(RecoveryError::InvalidFormat(format!(
                "entry '{name}' decompressed to {} bytes, expected {size}",
                data.len()
            )));
        }
        Ok(data)
    }
}
