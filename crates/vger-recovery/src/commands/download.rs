use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::crypto::Cipher;
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::volume::list_containers;

#[derive(Debug, Clone)]
pub enum DownloadProgressEvent {
    VolumeStarted {
        current: usize,
        total: usize,
        name: String,
    },
    VolumeSkipped {
        name: String,
    },
    VolumeFailed {
        name: String,
        error: String,
    },
}

#[derive(Debug, Default)]
pub struct DownloadStats {
    pub downloaded: usize,
    pub decrypted: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub interrupted: bool,
    pub errors: Vec<(String, String)>,
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(DownloadProgressEvent)>,
    event: DownloadProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

/// Fetch every backup volume from `storage` into `folder`.
///
/// With a cipher, encrypted volumes are stored decrypted under their plain
/// name. A volume whose local name already exists is skipped.
pub fn run(
    storage: &dyn StorageBackend,
    folder: &Path,
    prefix: Option<&str>,
    cipher: Option<&dyn Cipher>,
    cancel: &dyn Cancellation,
    mut progress: Option<&mut dyn FnMut(DownloadProgressEvent)>,
) -> Result<DownloadStats> {
    let listing = list_containers(storage, prefix)?;
    listing.require_single_prefix()?;
    std::fs::create_dir_all(folder)?;

    let mut stats = DownloadStats::default();
    let total = listing.volumes.len();
    for (i, (name, parsed)) in listing.volumes.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("download interrupted");
            stats.interrupted = true;
            break;
        }
        emit_progress(
            &mut progress,
            DownloadProgressEvent::VolumeStarted {
                current: i + 1,
                total,
                name: name.clone(),
            },
        );

        let decrypt = cipher.filter(|c| parsed.encryption.as_deref() == Some(c.extension()));
        let local_name = match decrypt {
            Some(_) => parsed.decrypted_name(),
            None => name.clone(),
        };
        let dest = folder.join(&local_name);
        if dest.exists() {
            debug!(volume = %local_name, "already present, skipping");
            emit_progress(&mut progress, DownloadProgressEvent::VolumeSkipped { name: local_name });
            stats.skipped += 1;
            continue;
        }

        match fetch(storage, folder, name, &dest, decrypt) {
            Ok(bytes) => {
                stats.downloaded += 1;
                stats.bytes += bytes;
                if decrypt.is_some() {
                    stats.decrypted += 1;
                }
            }
            Err(e) => {
                warn!(volume = %name, error = %e, "download failed");
                emit_progress(
                    &mut progress,
                    DownloadProgressEvent::VolumeFailed {
                        name: name.clone(),
                        error: e.to_string(),
                    },
                );
                stats.errors.push((name.clone(), e.to_string()));
            }
        }
    }

    info!(
        downloaded = stats.downloaded,
        skipped = stats.skipped,
        failed = stats.errors.len(),
        "download finished"
    );
    Ok(stats)
}

fn fetch(
    storage: &dyn StorageBackend,
    folder: &Path,
    name: &str,
    dest: &Path,
    decrypt: Option<&dyn Cipher>,
) -> Result<u64> {
    let staged = NamedTempFile::new_in(folder)?.into_temp_path();
    storage.get(name, &staged)?;
    match decrypt {
        Some(cipher) => {
            let plain = NamedTempFile::new_in(folder)?;
            cipher.decrypt_file(&staged, plain.path())?;
            plain.persist(dest).map_err(|e| e.error)?;
        }
        None => staged.persist(dest).map_err(|e| e.error)?,
    }
    Ok(std::fs::metadata(dest)?.len())
}

