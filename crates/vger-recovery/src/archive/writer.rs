use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use super::{EntryRecord, ARCHIVE_HEADER_SIZE, ARCHIVE_MAGIC, ARCHIVE_VERSION};
use crate::compress::{self, Compression};
use crate::error::{RecoveryError, Result};

/// Streams entries into a temp file next to the target; `finish` persists it.
/// Dropping an unfinished writer removes the temp file.
pub struct ArchiveWriter {
    target: PathBuf,
    compression: Compression,
    out: BufWriter<NamedTempFile>,
    entries: Vec<EntryRecord>,
    names: HashSet<String>,
    position: u64,
}

impl ArchiveWriter {
    pub fn create(target: &Path, compression: Compression) -> Result<Self> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        let mut out = BufWriter::new(tmp);
        out.write_all(ARCHIVE_MAGIC)?;
        out.write_all(&[ARCHIVE_VERSION])?;
        Ok(Self {
            target: target.to_path_buf(),
            compression,
            out,
            entries: Vec::new(),
            names: HashSet::new(),
            position: ARCHIVE_HEADER_SIZE as u64,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Change where `finish` moves the container.
    pub fn set_target(&mut self, target: &Path) {
        self.target = target.to_path_buf();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes written so far (header and payloads, without the trailer).
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn add_entry(&mut self, name: &str, data: &[u8], mtime: DateTime<Utc>) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(RecoveryError::InvalidFormat(format!(
                "duplicate entry '{name}' in {}",
                self.target.display()
            )));
        }
        let stored = compress::compress(self.compression, data)?;
        let length = u32::try_from(stored.len()).map_err(|_| {
            RecoveryError::InvalidFormat(format!("entry '{name}' too large for a container"))
        })?;
        self.out.write_all(&length.to_le_bytes())?;
        self.out.write_all(&stored)?;
        self.entries.push(EntryRecord {
            name: name.to_string(),
            offset: self.position + 4,
            length,
            size: data.len() as u64,
            mtime: mtime.timestamp(),
        });
        self.position += 4 + length as u64;
        Ok(())
    }

    /// Append the trailer, sync and atomically move the file into place.
    /// Returns the final container size.
    pub fn finish(mut self) -> Result<u64> {
        let trailer = rmp_serde::to_vec(&self.entries)?;
        self.out.write_all(&trailer)?;
        self.out.write_all(&(trailer.len() as u32).to_le_bytes())?;
        let total = self.position + trailer.len() as u64 + 4;

        let tmp = self
            .out
            .into_inner()
            .map_err(|e| RecoveryError::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.target).map_err(|e| RecoveryError::Io(e.error))?;
        Ok(total)
    }
}
