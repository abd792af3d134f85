use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::parse_line;
use super::sort::next_line;
use crate::error::{RecoveryError, Result};

/// Query structure over a sorted index file. Read-only once built.
pub enum Lookup {
    Memory(MemoryLookup),
    Sparse(SparseLookup),
}

impl Lookup {
    /// Container holding the block whose plain-base64 hash is `hash`.
    pub fn locate(&self, hash: &str) -> Result<Option<String>> {
        match self {
            Lookup::Memory(m) => Ok(m.locate(hash).map(str::to_string)),
            Lookup::Sparse(s) => s.locate(hash),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Lookup::Memory(_) => "memory",
            Lookup::Sparse(_) => "sparse",
        }
    }
}

/// Every distinct hash mapped to an interned container name.
pub struct MemoryLookup {
    map: HashMap<Box<str>, u32>,
    containers: Vec<String>,
}

impl MemoryLookup {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut map: HashMap<Box<str>, u32> = HashMap::new();
        let mut containers: Vec<String> = Vec::new();
        let mut container_ids: HashMap<String, u32> = HashMap::new();
        let mut line_no = 0u64;

        while let Some(line) = next_line(&mut reader)? {
            line_no += 1;
            if line.is_empty() {
                continue;
            }
            let (hash, container) = parse_line(&line, line_no)?;
            let id = match container_ids.get(container) {
                Some(&id) => id,
                None => {
                    let id = containers.len() as u32;
                    containers.push(container.to_string());
                    container_ids.insert(container.to_string(), id);
                    id
                }
            };
            // Any record for a hash is valid; keep the first.
            map.entry(hash.into()).or_insert(id);
        }
        debug!(hashes = map.len(), containers = containers.len(), "loaded index into memory");
        Ok(Self { map, containers })
    }

    pub fn locate(&self, hash: &str) -> Option<&str> {
        self.map
            .get(hash)
            .map(|&id| self.containers[id as usize].as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Evenly sampled `(hash, offset)` pairs over the index file. Lookups
/// binary-search the samples and scan the file forward from there.
pub struct SparseLookup {
    path: PathBuf,
    samples: Vec<(String, u64)>,
    file: Mutex<BufReader<File>>,
}

impl SparseLookup {
    pub fn build(path: &Path, sample_count: usize) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let sample_count = sample_count.max(1) as u64;
        let mut samples: Vec<(String, u64)> = Vec::with_capacity(sample_count as usize);

        for i in 0..sample_count {
            let target = len * i / sample_count;
            reader.seek(SeekFrom::Start(target))?;
            let mut offset = target;
            if target > 0 {
                // Skip to the start of the next full line.
                let mut partial = Vec::new();
                offset += reader.read_until(b'\n', &mut partial)? as u64;
            }
            if samples.last().is_some_and(|(_, o)| *o >= offset) {
                continue;
            }
            let Some(line) = next_line(&mut reader)? else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            let (hash, _) = parse_line(&line, 0)?;
            samples.push((hash.to_string(), offset));
        }
        debug!(samples = samples.len(), bytes = len, "built sparse index table");

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            file: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn locate(&self, hash: &str) -> Result<Option<String>> {
        // Greatest sample <= target.
        let idx = self
            .samples
            .partition_point(|(h, _)| h.as_bytes() <= hash.as_bytes());
        if idx == 0 {
            return Ok(None);
        }
        let start = self.samples[idx - 1].1;

        let mut reader = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        reader.seek(SeekFrom::Start(start))?;
        while let Some(line) = next_line(&mut *reader)? {
            if line.is_empty() {
                continue;
            }
            let (found, container) = parse_line(&line, 0).map_err(|e| match e {
                RecoveryError::IndexCorrupt { reason, .. } => RecoveryError::IndexCorrupt {
                    line: 0,
                    reason: format!("{reason} (near byte offset {start})"),
                },
                other => other,
            })?;
            match found.as_bytes().cmp(hash.as_bytes()) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(container.to_string())),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }
}
