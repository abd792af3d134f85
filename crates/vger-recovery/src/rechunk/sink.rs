//! Output side of a rechunk run: block containers rolled at a target size,
//! each followed by its index container.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::archive::{ArchiveWriter, Codec, PackCodec};
use crate::crypto::{seal_file, Cipher};
use crate::error::{RecoveryError, Result};
use crate::fileset::{
    list_entry_name, vol_entry_name, write_manifest, BlockRef, IndexVolume, Manifest,
};
use crate::hash::BlockHash;
use crate::volume::{plain_volume_name, FileType, ParsedVolume};

/// A finished block container and its index container.
#[derive(Debug, Clone)]
pub struct WrittenVolume {
    pub block_volume: String,
    pub index_volume: String,
    pub blocks: usize,
    pub size: u64,
}

struct OpenVolume {
    writer: ArchiveWriter,
    blocks: Vec<BlockRef>,
    /// Raw hash bytes of every block, in write order, for the volume id.
    id_material: Vec<u8>,
    blocklists: Vec<(BlockHash, Vec<u8>)>,
}

pub(crate) struct VolumeSink<'a> {
    folder: PathBuf,
    prefix: String,
    codec: PackCodec,
    cipher: Option<&'a dyn Cipher>,
    target_size: u64,
    current: Option<OpenVolume>,
    written: Vec<WrittenVolume>,
}

impl<'a> VolumeSink<'a> {
    pub fn new(
        folder: &Path,
        prefix: &str,
        codec: PackCodec,
        cipher: Option<&'a dyn Cipher>,
        target_size: u64,
    ) -> Self {
        Self {
            folder: folder.to_path_buf(),
            prefix: prefix.to_string(),
            codec,
            cipher,
            target_size,
            current: None,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[WrittenVolume] {
        &self.written
    }

    fn staging_path(&self) -> PathBuf {
        self.folder.join(format!(".{}-staging.dblock", self.prefix))
    }

    fn open(&mut self, manifest: &Manifest, mtime: DateTime<Utc>) -> Result<&mut OpenVolume> {
        if self.current.is_none() {
            let mut writer = self.codec.open_write(&self.staging_path())?;
            write_manifest(&mut writer, manifest, mtime)?;
            self.current = Some(OpenVolume {
                writer,
                blocks: Vec::new(),
                id_material: Vec::new(),
                blocklists: Vec::new(),
            });
        }
        self.current
            .as_mut()
            .ok_or_else(|| RecoveryError::Other("no open block volume".into()))
    }

    /// Store a block. Rolls over to a new volume once the current one
    /// reaches the target size.
    pub fn add_block(
        &mut self,
        hash: &BlockHash,
        data: &[u8],
        manifest: &Manifest,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        self.add(hash, data, false, manifest, mtime)
    }

    /// Store a blocklist block; it is also copied into the index container.
    pub fn add_blocklist(
        &mut self,
        hash: &BlockHash,
        data: &[u8],
        manifest: &Manifest,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        self.add(hash, data, true, manifest, mtime)
    }

    fn add(
        &mut self,
        hash: &BlockHash,
        data: &[u8],
        is_blocklist: bool,
        manifest: &Manifest,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        let target = self.target_size;
        let volume = self.open(manifest, mtime)?;
        volume.writer.add_entry(&hash.to_entry_name(), data, mtime)?;
        volume.blocks.push(BlockRef {
            hash: hash.to_base64(),
            size: data.len() as u64,
        });
        volume.id_material.extend_from_slice(hash.as_bytes());
        if is_blocklist {
            volume.blocklists.push((hash.clone(), data.to_vec()));
        }
        if volume.writer.position() >= target {
            self.flush(manifest, mtime)?;
        }
        Ok(())
    }

    /// Finish the open volume, if any, and write its index container.
    pub fn flush(&mut self, manifest: &Manifest, mtime: DateTime<Utc>) -> Result<Option<WrittenVolume>> {
        let Some(mut volume) = self.current.take() else {
            return Ok(None);
        };
        let seed = manifest.block_hash.digest(&volume.id_material);
        let enc = self.cipher.map(|c| c.extension());
        let ext = self.codec.extension();

        let block_name =
            ParsedVolume::with_id(&self.prefix, FileType::Blocks, seed.as_bytes(), ext, enc)
                .to_string();
        let block_path = self.place(&mut volume.writer, &block_name);
        volume.writer.finish()?;
        self.seal(&block_name)?;

        let volumesize = std::fs::metadata(&block_path)?.len();
        let volumehash = manifest.file_hash.digest_file(&block_path)?.to_base64();

        let index_name =
            ParsedVolume::with_id(&self.prefix, FileType::Index, seed.as_bytes(), ext, enc)
                .to_string();
        let doc = IndexVolume {
            blocks: volume.blocks,
            volumehash,
            volumesize,
        };
        self.write_volume(&index_name, |writer| {
            write_manifest(writer, manifest, mtime)?;
            writer.add_entry(&vol_entry_name(&block_name), &serde_json::to_vec(&doc)?, mtime)?;
            for (hash, data) in &volume.blocklists {
                writer.add_entry(&list_entry_name(hash), data, mtime)?;
            }
            Ok(())
        })?;

        debug!(volume = %block_name, blocks = doc.blocks.len(), bytes = volumesize, "wrote block volume");
        let written = WrittenVolume {
            block_volume: block_name,
            index_volume: index_name,
            blocks: doc.blocks.len(),
            size: volumesize,
        };
        self.written.push(written.clone());
        Ok(Some(written))
    }

    /// Write a complete volume named `name` through `fill`, encrypting it
    /// when the sink has a cipher.
    pub fn write_volume(
        &self,
        name: &str,
        fill: impl FnOnce(&mut ArchiveWriter) -> Result<()>,
    ) -> Result<()> {
        let mut writer = self.codec.open_write(&self.folder.join(plain_volume_name(name)))?;
        fill(&mut writer)?;
        writer.finish()?;
        self.seal(name)
    }

    /// Point a writer at the plain (unencrypted) path for `name`; returns
    /// the path the final volume will have.
    fn place(&self, writer: &mut ArchiveWriter, name: &str) -> PathBuf {
        writer.set_target(&self.folder.join(plain_volume_name(name)));
        self.folder.join(name)
    }

    /// Encrypt a just-finished plain volume into its final name.
    fn seal(&self, name: &str) -> Result<()> {
        seal_file(
            self.cipher,
            &self.folder.join(plain_volume_name(name)),
            &self.folder.join(name),
        )
    }
}
