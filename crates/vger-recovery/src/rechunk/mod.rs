//! Rebuilding file content from the hash index.
//!
//! [`restore::FileRestorer`] reconstructs single files at their original
//! block size. [`Rechunker`] rewrites whole backup generations so that every
//! `factor` consecutive old blocks become one new block, deduplicating groups
//! across all generations of the run.

pub mod restore;
mod sink;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::archive::{Codec, PackCodec};
use crate::cancel::Cancellation;
use crate::compress::MAX_DECOMPRESS_SIZE;
use crate::crypto::Cipher;
use crate::error::{RecoveryError, Result};
use crate::fileset::{
    join_blocklist, read_filelist, read_manifest, write_filelist, write_manifest, EntryType,
    FileContent, FileEntry, Manifest,
};
use crate::hash::{BlockHash, HashAlgorithm};
use crate::index::HashIndex;
use crate::volume::{FileType, ParsedVolume};

pub use restore::{FileRestorer, RestoredFile};
pub use sink::WrittenVolume;

use sink::VolumeSink;

/// Cross-generation rechunk state: which new block each group of old
/// blocks became, and which new blocks are already stored.
#[derive(Debug, Default)]
pub struct BlockMapping {
    groups: HashMap<BlockHash, BlockHash>,
    written: HashSet<BlockHash>,
}

impl BlockMapping {
    /// Canonical key of an ordered group of old hashes.
    pub fn group_key(algorithm: HashAlgorithm, group: &[BlockHash]) -> BlockHash {
        algorithm.digest(&join_blocklist(group))
    }

    pub fn get(&self, key: &BlockHash) -> Option<&BlockHash> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> usize {
        self.groups.len()
    }

    pub fn is_written(&self, hash: &BlockHash) -> bool {
        self.written.contains(hash)
    }

    pub fn blocks_written(&self) -> usize {
        self.written.len()
    }
}

#[derive(Debug, Clone)]
pub enum RechunkProgressEvent {
    GenerationStarted {
        current: usize,
        total: usize,
        name: String,
    },
    FileFailed {
        path: String,
        error: String,
    },
    GenerationWritten {
        name: String,
        files: usize,
    },
}

#[derive(Debug, Default)]
pub struct RechunkStats {
    pub generations: usize,
    pub files: u64,
    pub files_failed: u64,
    pub groups_reused: u64,
    pub blocks_written: u64,
    pub volumes_written: usize,
    pub interrupted: bool,
    /// `(path, error)` per failed file.
    pub errors: Vec<(String, String)>,
}

/// A failure while rewriting one file.
enum StepError {
    /// Counted; the file is left out and the run continues.
    Item(RecoveryError),
    /// Stops the run.
    Fatal(RecoveryError),
}

type Step<T> = std::result::Result<T, StepError>;

/// Size of the new blocks. Blocks larger than the decompression limit could
/// never be read back.
fn target_blocksize(blocksize: u64, factor: usize) -> Result<u64> {
    blocksize
        .checked_mul(factor as u64)
        .filter(|size| *size <= MAX_DECOMPRESS_SIZE)
        .ok_or_else(|| {
            RecoveryError::Usage(format!(
                "block size multiplier {factor} on {blocksize}-byte blocks exceeds the \
                 {MAX_DECOMPRESS_SIZE}-byte block limit"
            ))
        })
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(RechunkProgressEvent)>,
    event: RechunkProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

pub struct Rechunker<'a> {
    index: &'a HashIndex,
    factor: usize,
    prefix: String,
    codec: PackCodec,
    cipher: Option<&'a dyn Cipher>,
    mapping: BlockMapping,
    sink: VolumeSink<'a>,
    stats: RechunkStats,
}

impl<'a> Rechunker<'a> {
    pub fn new(
        index: &'a HashIndex,
        output: &Path,
        prefix: &str,
        codec: PackCodec,
        cipher: Option<&'a dyn Cipher>,
        factor: usize,
        volume_size: u64,
    ) -> Result<Self> {
        if factor < 1 {
            return Err(RecoveryError::Usage(
                "block size multiplier must be at least 1".into(),
            ));
        }
        target_blocksize(1, factor)?;
        std::fs::create_dir_all(output)?;
        Ok(Self {
            index,
            factor,
            prefix: prefix.to_string(),
            codec,
            cipher,
            mapping: BlockMapping::default(),
            sink: VolumeSink::new(output, prefix, codec, cipher, volume_size),
            stats: RechunkStats::default(),
        })
    }

    pub fn mapping(&self) -> &BlockMapping {
        &self.mapping
    }

    pub fn written_volumes(&self) -> &[WrittenVolume] {
        self.sink.written()
    }

    /// Rechunk `generations` (file-list volume names) oldest first.
    pub fn run(
        &mut self,
        generations: &[&str],
        cancel: &dyn Cancellation,
        mut progress: Option<&mut dyn FnMut(RechunkProgressEvent)>,
    ) -> Result<RechunkStats> {
        for (i, name) in generations.iter().enumerate() {
            emit_progress(
                &mut progress,
                RechunkProgressEvent::GenerationStarted {
                    current: i + 1,
                    total: generations.len(),
                    name: name.to_string(),
                },
            );
            match self.rechunk_generation(name, cancel, &mut progress) {
                Ok(()) => self.stats.generations += 1,
                Err(RecoveryError::Interrupted) => {
                    warn!("rechunk interrupted; stopping after partial output");
                    self.stats.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.stats.volumes_written = self.sink.written().len();
        info!(
            generations = self.stats.generations,
            files = self.stats.files,
            failed = self.stats.files_failed,
            blocks = self.stats.blocks_written,
            reused = self.stats.groups_reused,
            "rechunk finished"
        );
        Ok(std::mem::take(&mut self.stats))
    }

    fn rechunk_generation(
        &mut self,
        name: &str,
        cancel: &dyn Cancellation,
        progress: &mut Option<&mut dyn FnMut(RechunkProgressEvent)>,
    ) -> Result<()> {
        let (source, files) = {
            let lease = self.index.cache().lease(name)?;
            let mut archive = lease.lock();
            let manifest = read_manifest(archive.reader())?;
            let files = read_filelist(archive.reader())?;
            (manifest, files)
        };
        let time = ParsedVolume::parse(name)
            .and_then(|v| v.time())
            .unwrap_or(source.created);
        let target = Manifest {
            created: time,
            blocksize: target_blocksize(source.blocksize, self.factor)?,
            ..source.clone()
        };
        target.validate()?;

        let mut rewritten = Vec::with_capacity(files.len());
        for entry in &files {
            cancel.check()?;
            self.stats.files += 1;
            match self.rechunk_entry(entry, &source, &target, time, cancel) {
                Ok(new_entry) => rewritten.push(new_entry),
                Err(StepError::Item(e)) => {
                    warn!(path = %entry.path, error = %e, "file left out of rechunked backup");
                    emit_progress(
                        progress,
                        RechunkProgressEvent::FileFailed {
                            path: entry.path.clone(),
                            error: e.to_string(),
                        },
                    );
                    self.stats.files_failed += 1;
                    self.stats.errors.push((entry.path.clone(), e.to_string()));
                }
                Err(StepError::Fatal(e)) => return Err(e),
            }
        }

        self.sink.flush(&target, time)?;
        let files_name = self.write_files_volume(&target, &rewritten, time)?;
        emit_progress(
            progress,
            RechunkProgressEvent::GenerationWritten {
                name: files_name,
                files: rewritten.len(),
            },
        );
        Ok(())
    }

    fn rechunk_entry(
        &mut self,
        entry: &FileEntry,
        source: &Manifest,
        target: &Manifest,
        time: DateTime<Utc>,
        cancel: &dyn Cancellation,
    ) -> Step<FileEntry> {
        let mut out = entry.clone();
        if let Some(meta) = &entry.metahash {
            self.copy_block(meta, target, time)?;
        }
        if entry.entry_type != EntryType::File {
            return Ok(out);
        }

        match entry.content().map_err(StepError::Item)? {
            FileContent::Empty => {}
            FileContent::Single(hash) => self.copy_block(&hash, target, time)?,
            FileContent::Blocklists(lists) => {
                let digest_len = source.block_hash.digest_len();
                let mut old = Vec::new();
                for list in &lists {
                    let hash = BlockHash::from_base64(list).map_err(StepError::Item)?;
                    let children = self
                        .index
                        .read_blocklist_hashes(&hash, digest_len)
                        .map_err(StepError::Item)?;
                    old.extend(children);
                }

                let mut new_hashes = Vec::with_capacity(old.len() / self.factor + 1);
                let mut first_failure = None;
                for group in old.chunks(self.factor) {
                    cancel.check().map_err(StepError::Fatal)?;
                    match self.map_group(group, target, time) {
                        Ok(h) => new_hashes.push(h),
                        Err(StepError::Item(e)) => {
                            warn!(path = %entry.path, error = %e, "block group failed");
                            if first_failure.is_none() {
                                first_failure = Some(e);
                            }
                        }
                        Err(fatal) => return Err(fatal),
                    }
                }
                if let Some(e) = first_failure {
                    return Err(StepError::Item(e));
                }

                if let [single] = new_hashes.as_slice() {
                    let encoded = single.to_base64();
                    out.blockhash = (entry.hash.as_deref() != Some(encoded.as_str())).then_some(encoded);
                    out.blocklists = None;
                } else {
                    let per_block = target.hashes_per_block() as usize;
                    let mut lists = Vec::new();
                    for chunk in new_hashes.chunks(per_block) {
                        let raw = join_blocklist(chunk);
                        let hash = target.block_hash.digest(&raw);
                        self.store(&hash, &raw, true, target, time)?;
                        lists.push(hash.to_base64());
                    }
                    out.blockhash = None;
                    out.blocklists = Some(lists);
                }
            }
        }
        Ok(out)
    }

    /// New block for a group of old blocks, writing it on first sight.
    fn map_group(
        &mut self,
        group: &[BlockHash],
        target: &Manifest,
        time: DateTime<Utc>,
    ) -> Step<BlockHash> {
        let key = BlockMapping::group_key(target.block_hash, group);
        if let Some(known) = self.mapping.get(&key) {
            self.stats.groups_reused += 1;
            return Ok(known.clone());
        }
        let mut data = Vec::new();
        for old in group {
            data.extend(self.index.read_hash(old).map_err(StepError::Item)?);
        }
        let hash = target.block_hash.digest(&data);
        self.store(&hash, &data, false, target, time)?;
        self.mapping.groups.insert(key, hash.clone());
        Ok(hash)
    }

    /// Carry an unchanged block over to the output.
    fn copy_block(&mut self, encoded: &str, target: &Manifest, time: DateTime<Utc>) -> Step<()> {
        let hash = BlockHash::from_base64(encoded).map_err(StepError::Item)?;
        if self.mapping.is_written(&hash) {
            return Ok(());
        }
        let data = self.index.read_hash(&hash).map_err(StepError::Item)?;
        self.store(&hash, &data, false, target, time)
    }

    fn store(
        &mut self,
        hash: &BlockHash,
        data: &[u8],
        is_blocklist: bool,
        target: &Manifest,
        time: DateTime<Utc>,
    ) -> Step<()> {
        if self.mapping.written.contains(hash) {
            return Ok(());
        }
        let result = if is_blocklist {
            self.sink.add_blocklist(hash, data, target, time)
        } else {
            self.sink.add_block(hash, data, target, time)
        };
        result.map_err(StepError::Fatal)?;
        self.mapping.written.insert(hash.clone());
        self.stats.blocks_written += 1;
        Ok(())
    }

    fn write_files_volume(
        &self,
        manifest: &Manifest,
        files: &[FileEntry],
        time: DateTime<Utc>,
    ) -> Result<String> {
        let name = ParsedVolume::with_time(
            &self.prefix,
            FileType::Files,
            time,
            self.codec.extension(),
            self.cipher.map(|c| c.extension()),
        )
        .to_string();
        self.sink.write_volume(&name, |writer| {
            write_manifest(writer, manifest, time)?;
            write_filelist(writer, files, time)
        })?;
        Ok(name)
    }
}
