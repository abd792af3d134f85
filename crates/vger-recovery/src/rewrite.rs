//! Rewrites a backup set under a different compression (and optionally
//! encryption) module.
//!
//! File lists go first, then block containers, then index containers: the
//! `vol/` documents in index containers describe block containers by name,
//! size and hash, so they are patched once the new block containers exist
//! and have been measured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::archive::{Codec, PackCodec};
use crate::cache::ArchiveCache;
use crate::cancel::Cancellation;
use crate::crypto::{seal_file, Cipher};
use crate::error::{RecoveryError, Result};
use crate::fileset::{read_manifest, vol_entry_name, IndexVolume, Manifest, MANIFEST_ENTRY, VOL_PREFIX};
use crate::hash::HashAlgorithm;
use crate::volume::{plain_volume_name, FileType, ParsedVolume, VolumeListing};

/// A block container as it exists in the output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenBlock {
    pub name: String,
    pub size: u64,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Written { name: String, size: u64 },
    /// The target already existed and was left alone.
    Skipped { name: String },
}

#[derive(Debug, Clone)]
pub enum RewriteProgressEvent {
    ContainerStarted {
        current: usize,
        total: usize,
        name: String,
    },
    ContainerSkipped {
        name: String,
    },
    ContainerFailed {
        name: String,
        error: String,
    },
}

#[derive(Debug, Default)]
pub struct RewriteStats {
    pub written: usize,
    pub skipped: usize,
    pub interrupted: bool,
    /// `(container, error)` per failed container.
    pub errors: Vec<(String, String)>,
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(RewriteProgressEvent)>,
    event: RewriteProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

pub struct ContainerRewriter<'a> {
    source: &'a ArchiveCache,
    output: PathBuf,
    codec: PackCodec,
    cipher: Option<&'a dyn Cipher>,
    /// Source block container name -> its rewritten counterpart.
    blocks: HashMap<String, RewrittenBlock>,
}

impl<'a> ContainerRewriter<'a> {
    pub fn new(
        source: &'a ArchiveCache,
        output: &Path,
        codec: PackCodec,
        cipher: Option<&'a dyn Cipher>,
    ) -> Result<Self> {
        if same_folder(source.folder(), output) {
            return Err(RecoveryError::Usage(
                "output folder must differ from the source folder".into(),
            ));
        }
        std::fs::create_dir_all(output)?;
        Ok(Self {
            source,
            output: output.to_path_buf(),
            codec,
            cipher,
            blocks: HashMap::new(),
        })
    }

    /// Name of `volume` under the target modules.
    pub fn target_name(&self, volume: &ParsedVolume) -> String {
        volume
            .renamed(self.codec.extension(), self.cipher.map(|c| c.extension()))
            .to_string()
    }

    pub fn rewritten_blocks(&self) -> &HashMap<String, RewrittenBlock> {
        &self.blocks
    }

    /// Rewrite every container of `listing` in Files, Blocks, Index order.
    pub fn rewrite_set(
        &mut self,
        listing: &VolumeListing,
        cancel: &dyn Cancellation,
        mut progress: Option<&mut dyn FnMut(RewriteProgressEvent)>,
    ) -> Result<RewriteStats> {
        let mut ordered: Vec<&str> = Vec::with_capacity(listing.volumes.len());
        for file_type in [FileType::Files, FileType::Blocks, FileType::Index] {
            ordered.extend(listing.of_type(file_type).map(|(n, _)| n.as_str()));
        }

        let mut stats = RewriteStats::default();
        for (i, name) in ordered.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("rewrite interrupted");
                stats.interrupted = true;
                break;
            }
            emit_progress(
                &mut progress,
                RewriteProgressEvent::ContainerStarted {
                    current: i + 1,
                    total: ordered.len(),
                    name: name.to_string(),
                },
            );
            match self.rewrite_container(name) {
                Ok(RewriteOutcome::Written { .. }) => stats.written += 1,
                Ok(RewriteOutcome::Skipped { name }) => {
                    emit_progress(&mut progress, RewriteProgressEvent::ContainerSkipped { name });
                    stats.skipped += 1;
                }
                Err(e) if e.is_usage() => return Err(e),
                Err(e) => {
                    warn!(volume = %name, error = %e, "failed to rewrite container");
                    emit_progress(
                        &mut progress,
                        RewriteProgressEvent::ContainerFailed {
                            name: name.to_string(),
                            error: e.to_string(),
                        },
                    );
                    stats.errors.push((name.to_string(), e.to_string()));
                }
            }
        }
        info!(
            written = stats.written,
            skipped = stats.skipped,
            failed = stats.errors.len(),
            "rewrite finished"
        );
        Ok(stats)
    }

    /// Rewrite one container. An existing target is skipped; a skipped block
    /// container is still measured so index containers can refer to it.
    pub fn rewrite_container(&mut self, name: &str) -> Result<RewriteOutcome> {
        let parsed = ParsedVolume::parse(name).ok_or_else(|| RecoveryError::ContainerOpen {
            name: name.to_string(),
            reason: "not a backup volume name".into(),
        })?;
        let target = self.target_name(&parsed);
        let target_path = self.output.join(&target);

        if target_path.exists() {
            debug!(volume = %target, "target exists, skipping");
            if parsed.file_type == FileType::Blocks {
                let algorithm = self.source_file_hash(name);
                self.record_block(name, &target, algorithm)?;
            }
            return Ok(RewriteOutcome::Skipped { name: target });
        }

        let lease = self.source.lease(name)?;
        let mut archive = lease.lock();
        let reader = archive.reader();
        let entries = reader.entries().to_vec();

        let mut file_hash = HashAlgorithm::default();
        let plain_path = self.output.join(plain_volume_name(&target));
        let mut writer = self.codec.open_write(&plain_path)?;
        for entry in &entries {
            let mut data = reader.read_entry(&entry.name)?;
            let mut entry_name = entry.name.clone();

            if entry.name == MANIFEST_ENTRY {
                if let Ok(manifest) = serde_json::from_slice::<Manifest>(&data) {
                    file_hash = manifest.file_hash;
                }
            } else if parsed.file_type == FileType::Index {
                if let Some(block_volume) = entry.name.strip_prefix(VOL_PREFIX) {
                    let (patched_name, patched) = self.patch_index_volume(block_volume, &data, file_hash)?;
                    entry_name = patched_name;
                    data = patched;
                }
            }

            let mtime = DateTime::from_timestamp(entry.mtime, 0).unwrap_or_default();
            writer.add_entry(&entry_name, &data, mtime)?;
        }
        drop(archive);
        writer.finish()?;
        seal_file(self.cipher, &plain_path, &target_path)?;

        let size = std::fs::metadata(&target_path)?.len();
        if parsed.file_type == FileType::Blocks {
            self.record_block(name, &target, file_hash)?;
        }
        debug!(source = %name, volume = %target, bytes = size, "rewrote container");
        Ok(RewriteOutcome::Written { name: target, size })
    }

    /// Point a `vol/` document at the rewritten block container and update
    /// its size and hash.
    fn patch_index_volume(
        &mut self,
        block_volume: &str,
        data: &[u8],
        algorithm: HashAlgorithm,
    ) -> Result<(String, Vec<u8>)> {
        let mut doc: IndexVolume = serde_json::from_slice(data)?;
        if !self.blocks.contains_key(block_volume) {
            // Rewritten by an earlier run: measure what is on disk.
            if let Some(parsed) = ParsedVolume::parse(block_volume) {
                let target = self.target_name(&parsed);
                if self.output.join(&target).exists() {
                    self.record_block(block_volume, &target, algorithm)?;
                }
            }
        }
        match self.blocks.get(block_volume) {
            Some(block) => {
                doc.volumehash = block.hash.clone();
                doc.volumesize = block.size;
                Ok((vol_entry_name(&block.name), serde_json::to_vec(&doc)?))
            }
            None => {
                warn!(volume = %block_volume, "index refers to a block volume that was not rewritten");
                Ok((vol_entry_name(block_volume), data.to_vec()))
            }
        }
    }

    fn record_block(&mut self, source: &str, target: &str, algorithm: HashAlgorithm) -> Result<()> {
        let path = self.output.join(target);
        let size = std::fs::metadata(&path)?.len();
        let hash = algorithm.digest_file(&path)?.to_base64();
        self.blocks.insert(
            source.to_string(),
            RewrittenBlock {
                name: target.to_string(),
                size,
                hash,
            },
        );
        Ok(())
    }

    fn source_file_hash(&self, name: &str) -> HashAlgorithm {
        self.source
            .lease(name)
            .and_then(|lease| {
                let mut archive = lease.lock();
                read_manifest(archive.reader())
            })
            .map(|m| m.file_hash)
            .unwrap_or_default()
    }
}

fn same_folder(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}
