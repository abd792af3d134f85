//! LRU-bounded pool of open block containers.
//!
//! Containers are keyed by file name. The whole map sits behind one mutex;
//! each open container has its own mutex so reads of different containers
//! do not contend once leased. A container is never evicted while a lease
//! on it is alive.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::archive::{codec_for_extension, ArchiveReader};
use crate::crypto::Cipher;
use crate::error::{RecoveryError, Result};
use crate::hash::BlockHash;
use crate::volume::ParsedVolume;

/// An open container plus the decrypted temp copy it reads from, if any.
/// Field order matters: the reader closes before the temp file is removed.
pub struct OpenArchive {
    reader: ArchiveReader,
    _plain: Option<TempPath>,
}

impl OpenArchive {
    pub fn reader(&mut self) -> &mut ArchiveReader {
        &mut self.reader
    }
}

type Slot = Arc<Mutex<OpenArchive>>;

/// A borrowed container. While any lease exists the container stays open.
pub struct ArchiveLease {
    name: String,
    slot: Slot,
}

impl ArchiveLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> MutexGuard<'_, OpenArchive> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ArchiveCache {
    folder: PathBuf,
    capacity: usize,
    cipher: Option<Arc<dyn Cipher>>,
    open: Mutex<LruCache<String, Slot>>,
}

impl ArchiveCache {
    pub fn new(folder: &Path, capacity: usize, cipher: Option<Arc<dyn Cipher>>) -> Self {
        Self {
            folder: folder.to_path_buf(),
            capacity: capacity.max(1),
            cipher,
            open: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of containers currently open.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.map().contains(name)
    }

    /// Close every container that is not leased.
    pub fn clear(&self) {
        let mut map = self.map();
        let idle: Vec<String> = map
            .iter()
            .filter(|(_, slot)| Arc::strong_count(slot) == 1)
            .map(|(k, _)| k.clone())
            .collect();
        for key in idle {
            map.pop(&key);
        }
    }

    fn map(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a container, opening it (and evicting the least recently used
    /// idle container when at capacity) if needed.
    pub fn lease(&self, name: &str) -> Result<ArchiveLease> {
        let mut map = self.map();
        if let Some(slot) = map.get(name) {
            return Ok(ArchiveLease {
                name: name.to_string(),
                slot: Arc::clone(slot),
            });
        }

        let archive = self.open_archive(name)?;
        while map.len() >= self.capacity {
            let victim = map
                .iter()
                .rev()
                .find(|(_, slot)| Arc::strong_count(slot) == 1)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    debug!(volume = %key, "evicting container");
                    map.pop(&key);
                }
                None => {
                    warn!(
                        open = map.len(),
                        capacity = self.capacity,
                        "all open containers are leased; exceeding cache capacity"
                    );
                    break;
                }
            }
        }

        let slot = Arc::new(Mutex::new(archive));
        map.put(name.to_string(), Arc::clone(&slot));
        Ok(ArchiveLease {
            name: name.to_string(),
            slot,
        })
    }

    /// Read one entry of a container.
    pub fn read_entry(&self, container: &str, entry: &str) -> Result<Vec<u8>> {
        let lease = self.lease(container)?;
        let mut archive = lease.lock();
        archive
            .reader()
            .read_entry(entry)
            .map_err(|e| match e {
                RecoveryError::EntryNotFound { .. } => RecoveryError::EntryNotFound {
                    container: container.to_string(),
                    entry: entry.to_string(),
                },
                other => other,
            })
    }

    /// Read a block by its content address.
    pub fn read_block(&self, container: &str, hash: &BlockHash) -> Result<Vec<u8>> {
        self.read_entry(container, &hash.to_entry_name())
    }

    fn open_archive(&self, name: &str) -> Result<OpenArchive> {
        let parsed = ParsedVolume::parse(name).ok_or_else(|| RecoveryError::ContainerOpen {
            name: name.to_string(),
            reason: "not a backup volume name".into(),
        })?;
        let codec = codec_for_extension(&parsed.compression, 0).ok_or_else(|| {
            RecoveryError::ContainerOpen {
                name: name.to_string(),
                reason: format!("no codec for extension '{}'", parsed.compression),
            }
        })?;
        let path = self.folder.join(name);

        let plain = match &parsed.encryption {
            None => None,
            Some(ext) => {
                let cipher = self
                    .cipher
                    .as_ref()
                    .ok_or_else(|| RecoveryError::PassphraseRequired(name.to_string()))?;
                if cipher.extension() != ext {
                    return Err(RecoveryError::ContainerOpen {
                        name: name.to_string(),
                        reason: format!("no encryption module for extension '{ext}'"),
                    });
                }
                let tmp = tempfile::Builder::new()
                    .prefix("vger-recovery-")
                    .tempfile()?
                    .into_temp_path();
                cipher.decrypt_file(&path, &tmp)?;
                Some(tmp)
            }
        };

        let read_path = plain.as_deref().unwrap_or(path.as_path());
        let reader = codec
            .open_read(read_path)
            .map_err(|e| RecoveryError::ContainerOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!(volume = %name, entries = reader.entries().len(), "opened container");
        Ok(OpenArchive {
            reader,
            _plain: plain,
        })
    }
}
