use std::path::Path;

use tracing::{info, warn};

use super::util::{compile_filter, BackupSet};
use crate::cancel::Cancellation;
use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::fileset::EntryType;
use crate::rechunk::restore::{target_path, FileRestorer};

#[derive(Debug, Clone)]
pub enum RestoreProgressEvent {
    FileStarted {
        current: usize,
        total: usize,
        path: String,
    },
    FileFailed {
        path: String,
        error: String,
    },
}

#[derive(Debug, Default)]
pub struct RestoreStats {
    pub files: u64,
    pub folders: u64,
    pub bytes: u64,
    pub interrupted: bool,
    /// `(path, error)` per file that failed.
    pub errors: Vec<(String, String)>,
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(RestoreProgressEvent)>,
    event: RestoreProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

/// Run `vger-recovery restore`: rebuild the files of `version` matching
/// `pattern`, below `target` or at their original paths.
///
/// Only a missing or unbuildable index stops the run; every per-file
/// failure is counted and the next file is attempted.
pub fn run(
    set: &BackupSet,
    config: &RecoveryConfig,
    version: &str,
    target: Option<&Path>,
    pattern: Option<&str>,
    cancel: &dyn Cancellation,
    mut progress: Option<&mut dyn FnMut(RestoreProgressEvent)>,
) -> Result<RestoreStats> {
    let filter = compile_filter(pattern)?;
    let name = set.resolve_version(version)?;
    let (manifest, files) = set.read_fileset(&name)?;
    let index = set.open_index(config, cancel)?;
    let restorer = FileRestorer::new(&index, &manifest);

    let selected: Vec<_> = files
        .iter()
        .filter(|f| filter.as_ref().map_or(true, |m| m.is_match(&f.path)))
        .collect();
    info!(version = %name, files = selected.len(), "restoring");

    let mut stats = RestoreStats::default();
    for (i, entry) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("restore interrupted");
            stats.interrupted = true;
            break;
        }
        emit_progress(
            &mut progress,
            RestoreProgressEvent::FileStarted {
                current: i + 1,
                total: selected.len(),
                path: entry.path.clone(),
            },
        );

        let result = target_path(&entry.path, target).and_then(|dest| match entry.entry_type {
            EntryType::Folder => {
                std::fs::create_dir_all(&dest)?;
                stats.folders += 1;
                Ok(())
            }
            EntryType::File => {
                let restored = restorer.restore_file(entry, &dest)?;
                stats.files += 1;
                stats.bytes += restored.bytes;
                Ok(())
            }
            // Link targets live in metadata blocks, which are not restored.
            EntryType::Symlink => Ok(()),
        });

        if let Err(e) = result {
            warn!(path = %entry.path, error = %e, "failed to restore file");
            emit_progress(
                &mut progress,
                RestoreProgressEvent::FileFailed {
                    path: entry.path.clone(),
                    error: e.to_string(),
                },
            );
            stats.errors.push((entry.path.clone(), e.to_string()));
        }
    }

    info!(
        files = stats.files,
        folders = stats.folders,
        bytes = stats.bytes,
        failed = stats.errors.len(),
        "restore finished"
    );
    Ok(stats)
}
