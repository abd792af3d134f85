use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::archive::{ArchiveReader, ArchiveWriter, Codec, PackCodec};
use crate::compress::Compression;
use crate::config::{KdfConfig, RecoveryConfig};
use crate::error::{RecoveryError, Result};
use crate::fileset::{
    join_blocklist, list_entry_name, vol_entry_name, write_filelist, write_manifest, BlockRef,
    EntryType, FileEntry, IndexVolume, Manifest,
};
use crate::hash::{BlockHash, HashAlgorithm};
use crate::storage::StorageBackend;
use crate::volume::{FileType, ParsedVolume};

/// Argon2 parameters small enough for unit tests.
pub fn test_kdf() -> KdfConfig {
    KdfConfig {
        time_cost: 1,
        memory_cost: 64,
        parallelism: 1,
    }
}

pub fn test_config() -> RecoveryConfig {
    let mut config = RecoveryConfig::default();
    config.encryption.kdf = test_kdf();
    config
}

/// `2024-01-<day>T12:00:00Z`
pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

/// Deterministic pseudo-random bytes with no short period, so distinct
/// offsets give distinct blocks.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    let mut state = (seed as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u8
        })
        .collect()
}

/// Writes synthetic backup sets: block volumes with their index volumes,
/// and one file-list volume per generation.
pub struct SetBuilder {
    folder: PathBuf,
    prefix: String,
    manifest: Manifest,
    codec: PackCodec,
    index_volumes: bool,
    pending: BTreeMap<BlockHash, Vec<u8>>,
    pending_lists: Vec<BlockHash>,
    stored: HashSet<BlockHash>,
    volumes: usize,
    /// Block volume name -> hashes it holds.
    pub block_volumes: Vec<(String, Vec<BlockHash>)>,
}

impl SetBuilder {
    pub fn new(folder: &Path, prefix: &str, blocksize: u64) -> Self {
        std::fs::create_dir_all(folder).unwrap();
        let mut manifest = Manifest::new(blocksize, HashAlgorithm::Sha256, HashAlgorithm::Sha256);
        manifest.created = day(1);
        Self {
            folder: folder.to_path_buf(),
            prefix: prefix.to_string(),
            manifest,
            codec: PackCodec::new(Compression::Lz4),
            index_volumes: true,
            pending: BTreeMap::new(),
            pending_lists: Vec::new(),
            stored: HashSet::new(),
            volumes: 0,
            block_volumes: Vec::new(),
        }
    }

    /// Write block volumes only, like a set whose index volumes were lost.
    pub fn without_index_volumes(mut self) -> Self {
        self.index_volumes = false;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn stage(&mut self, hash: &BlockHash, data: &[u8]) {
        if self.stored.insert(hash.clone()) {
            self.pending.insert(hash.clone(), data.to_vec());
        }
    }

    /// Split `content` into blocks, stage them, and describe the file.
    pub fn file(&mut self, path: &str, content: &[u8]) -> FileEntry {
        let algo = self.manifest.block_hash;
        let file_hash = self.manifest.file_hash.digest(content).to_base64();
        let mut entry = FileEntry {
            entry_type: EntryType::File,
            path: path.to_string(),
            hash: Some(file_hash.clone()),
            size: content.len() as u64,
            time: day(1),
            metahash: None,
            metasize: None,
            blockhash: None,
            blocklists: None,
        };
        if content.is_empty() {
            return entry;
        }

        let hashes: Vec<BlockHash> = content
            .chunks(self.manifest.blocksize as usize)
            .map(|chunk| {
                let h = algo.digest(chunk);
                self.stage(&h, chunk);
                h
            })
            .collect();

        if let [single] = hashes.as_slice() {
            let encoded = single.to_base64();
            entry.blockhash = (encoded != file_hash).then_some(encoded);
            return entry;
        }

        let per_block = self.manifest.hashes_per_block() as usize;
        let mut lists = Vec::new();
        for group in hashes.chunks(per_block) {
            let raw = join_blocklist(group);
            let h = algo.digest(&raw);
            if !self.stored.contains(&h) {
                self.pending_lists.push(h.clone());
            }
            self.stage(&h, &raw);
            lists.push(h.to_base64());
        }
        entry.blocklists = Some(lists);
        entry
    }

    pub fn folder_entry(path: &str) -> FileEntry {
        FileEntry {
            entry_type: EntryType::Folder,
            path: path.to_string(),
            hash: None,
            size: 0,
            time: day(1),
            metahash: None,
            metasize: None,
            blockhash: None,
            blocklists: None,
        }
    }

    /// Write the staged blocks as one block volume (plus its index volume).
    pub fn flush_blocks(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.volumes += 1;
        let seed = self
            .manifest
            .block_hash
            .digest(format!("{}-{}", self.prefix, self.volumes).as_bytes());
        let ext = self.codec.extension();
        let block_name =
            ParsedVolume::with_id(&self.prefix, FileType::Blocks, seed.as_bytes(), ext, None)
                .to_string();
        let block_path = self.folder.join(&block_name);

        let blocks = std::mem::take(&mut self.pending);
        let mut writer = self.codec.open_write(&block_path).unwrap();
        write_manifest(&mut writer, &self.manifest, day(1)).unwrap();
        for (hash, data) in &blocks {
            writer.add_entry(&hash.to_entry_name(), data, day(1)).unwrap();
        }
        writer.finish().unwrap();

        let lists = std::mem::take(&mut self.pending_lists);
        if self.index_volumes {
            let index_name =
                ParsedVolume::with_id(&self.prefix, FileType::Index, seed.as_bytes(), ext, None)
                    .to_string();
            let doc = IndexVolume {
                blocks: blocks
                    .iter()
                    .map(|(h, d)| BlockRef {
                        hash: h.to_base64(),
                        size: d.len() as u64,
                    })
                    .collect(),
                volumehash: self
                    .manifest
                    .file_hash
                    .digest_file(&block_path)
                    .unwrap()
                    .to_base64(),
                volumesize: std::fs::metadata(&block_path).unwrap().len(),
            };
            let mut writer = self.codec.open_write(&self.folder.join(&index_name)).unwrap();
            write_manifest(&mut writer, &self.manifest, day(1)).unwrap();
            writer
                .add_entry(
                    &vol_entry_name(&block_name),
                    &serde_json::to_vec(&doc).unwrap(),
                    day(1),
                )
                .unwrap();
            for h in &lists {
                writer.add_entry(&list_entry_name(h), &blocks[h], day(1)).unwrap();
            }
            writer.finish().unwrap();
        }

        self.block_volumes
            .push((block_name.clone(), blocks.into_keys().collect()));
        Some(block_name)
    }

    /// Flush staged blocks and write a file-list volume dated `time`.
    pub fn generation(&mut self, time: DateTime<Utc>, entries: &[FileEntry]) -> String {
        self.flush_blocks();
        let name = ParsedVolume::with_time(
            &self.prefix,
            FileType::Files,
            time,
            self.codec.extension(),
            None,
        )
        .to_string();
        let mut manifest = self.manifest.clone();
        manifest.created = time;
        let mut writer = self.codec.open_write(&self.folder.join(&name)).unwrap();
        write_manifest(&mut writer, &manifest, time).unwrap();
        write_filelist(&mut writer, entries, time).unwrap();
        writer.finish().unwrap();
        name
    }
}

/// Replace the stored bytes of one entry in a container, keeping the rest.
pub fn rewrite_entry(container: &Path, entry: &str, data: &[u8]) {
    let mut reader = ArchiveReader::open(container).unwrap();
    let mut entries = Vec::new();
    for record in reader.entries().to_vec() {
        let bytes = if record.name == entry {
            data.to_vec()
        } else {
            reader.read_entry(&record.name).unwrap()
        };
        entries.push((record.name, bytes));
    }
    drop(reader);
    let mut writer = ArchiveWriter::create(container, Compression::Lz4).unwrap();
    for (name, bytes) in entries {
        writer.add_entry(&name, &bytes, day(1)).unwrap();
    }
    writer.finish().unwrap();
}

/// Names of every regular file in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// In-memory storage backend for testing. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.data.lock().unwrap().insert(name.to_string(), data);
    }
}

impl StorageBackend for MemoryBackend {
    fn list(&self) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn get(&self, name: &str, dest: &Path) -> Result<()> {
        let data = self
            .data
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RecoveryError::Other(format!("no such object: {name}")))?;
        std::fs::write(dest, data)?;
        Ok(())
    }

    fn put(&self, name: &str, src: &Path) -> Result<()> {
        let data = std::fs::read(src)?;
        self.data.lock().unwrap().insert(name.to_string(), data);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.data.lock().unwrap().remove(name);
        Ok(())
    }
}
