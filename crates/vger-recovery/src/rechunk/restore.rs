use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{RecoveryError, Result};
use crate::fileset::{FileContent, FileEntry, Manifest};
use crate::hash::BlockHash;
use crate::index::HashIndex;

/// Outcome of one successfully verified file.
#[derive(Debug)]
pub struct RestoredFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Rebuilds single files block by block from the hash index.
pub struct FileRestorer<'a> {
    index: &'a HashIndex,
    manifest: &'a Manifest,
}

impl<'a> FileRestorer<'a> {
    pub fn new(index: &'a HashIndex, manifest: &'a Manifest) -> Self {
        Self { index, manifest }
    }

    /// Restore `entry` to `dest`.
    ///
    /// Every block is written at its own offset, so a failed block leaves a
    /// hole instead of shifting later data. The result is checked against
    /// the recorded file hash. A file that fails the check is left at `dest`
    /// only if nothing existed there before; the failure is returned either
    /// way. Unreadable blocks are reported with the first underlying error.
    pub fn restore_file(&self, entry: &FileEntry, dest: &Path) -> Result<RestoredFile> {
        let content = entry.content()?;
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let existed = dest.exists();

        let mut tmp = NamedTempFile::new_in(parent)?;
        let mut block_errors: Vec<RecoveryError> = Vec::new();
        self.write_blocks(&content, tmp.as_file_mut(), &mut block_errors)?;
        tmp.as_file_mut().set_len(entry.size)?;
        tmp.as_file_mut().flush()?;

        let actual = self.manifest.file_hash.digest_file(tmp.path())?;
        let mismatch = match &entry.hash {
            Some(expected) if *expected != actual.to_base64() => Some(expected.clone()),
            _ => None,
        };

        if block_errors.is_empty() && mismatch.is_none() {
            tmp.persist(dest).map_err(|e| e.error)?;
            return Ok(RestoredFile {
                path: dest.to_path_buf(),
                bytes: entry.size,
            });
        }

        if existed {
            warn!(path = %dest.display(), "restored data failed verification; keeping existing file");
        } else {
            tmp.persist(dest).map_err(|e| e.error)?;
        }

        if let Some(expected) = mismatch.filter(|_| block_errors.is_empty()) {
            return Err(RecoveryError::FileHashMismatch {
                path: entry.path.clone(),
                expected,
                actual: actual.to_base64(),
            });
        }
        for e in &block_errors {
            warn!(path = %entry.path, error = %e, "block could not be read");
        }
        let failed = block_errors.len();
        Err(RecoveryError::BlocksUnreadable {
            path: entry.path.clone(),
            failed,
            first: Box::new(block_errors.swap_remove(0)),
        })
    }

    fn write_blocks(
        &self,
        content: &FileContent,
        out: &mut File,
        block_errors: &mut Vec<RecoveryError>,
    ) -> Result<()> {
        let blocksize = self.manifest.blocksize;
        let per_block = self.manifest.hashes_per_block();
        let digest_len = self.manifest.block_hash.digest_len();

        match content {
            FileContent::Empty => {}
            FileContent::Single(hash) => match self.read_block(hash) {
                Ok(data) => write_at(out, 0, &data)?,
                Err(e) => block_errors.push(e),
            },
            FileContent::Blocklists(lists) => {
                for (i, list) in lists.iter().enumerate() {
                    let children = match BlockHash::from_base64(list)
                        .and_then(|h| self.index.read_blocklist_hashes(&h, digest_len))
                    {
                        Ok(c) => c,
                        Err(e) => {
                            block_errors.push(e);
                            continue;
                        }
                    };
                    for (j, child) in children.iter().enumerate() {
                        let offset = (i as u64 * per_block + j as u64) * blocksize;
                        match self.index.read_hash(child) {
                            Ok(data) => write_at(out, offset, &data)?,
                            Err(e) => block_errors.push(e),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn read_block(&self, hash: &str) -> Result<Vec<u8>> {
        self.index.read_hash(&BlockHash::from_base64(hash)?)
    }
}

fn write_at(out: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    out.seek(SeekFrom::Start(offset))?;
    out.write_all(data)?;
    Ok(())
}

/// Where a backed-up path lands: its original location, or below `target`
/// with root, drive and parent components removed.
pub fn target_path(original: &str, target: Option<&Path>) -> Result<PathBuf> {
    let Some(root) = target else {
        return Ok(PathBuf::from(original));
    };
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for part in original.split(['/', '\\']) {
        let component = Path::new(part).components().next();
        match component {
            Some(Component::Normal(p)) if !part.ends_with(':') => {
                out.push(p);
                pushed = true;
            }
            Some(Component::ParentDir) => {
                return Err(RecoveryError::InvalidFormat(format!(
                    "refusing to restore unsafe path: {original}"
                )));
            }
            _ => {}
        }
    }
    if !pushed {
        return Err(RecoveryError::InvalidFormat(format!(
            "refusing to restore empty path: {original}"
        )));
    }
    Ok(out)
}
