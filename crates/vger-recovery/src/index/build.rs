use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::format_line;
use super::sort::{merge_sorted, sort_file};
use crate::cache::ArchiveCache;
use crate::cancel::Cancellation;
use crate::error::{RecoveryError, Result};
use crate::fileset::{IndexVolume, MANIFEST_ENTRY, VOL_PREFIX};
use crate::hash::{entry_name_to_base64, BlockHash};
use crate::volume::{NameResolver, VolumeListing};

/// How records from block containers are accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Collect every record in one ordered set, write once.
    #[default]
    Set,
    /// Sort each container's records and merge them into the running index.
    Merge,
}

/// Where the records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    IndexVolumes,
    BlockVolumes,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Scan block containers even when index containers exist.
    pub from_blocks: bool,
}

#[derive(Debug, Clone)]
pub enum IndexProgressEvent {
    ContainerStarted {
        current: usize,
        total: usize,
        name: String,
    },
    ContainerFailed {
        name: String,
        error: String,
    },
    Writing {
        records: u64,
    },
}

#[derive(Debug)]
pub struct IndexBuildStats {
    pub source: IndexSource,
    pub containers_scanned: usize,
    pub records: u64,
    /// `(container, error)` for every container that could not be read.
    pub errors: Vec<(String, String)>,
}

fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(IndexProgressEvent)>,
    event: IndexProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

/// Build the index file at `out` from the volumes in `listing`.
///
/// Index containers are used when present unless `from_blocks` is set.
/// The file appears at `out` only once the build completes.
pub fn build_index(
    cache: &ArchiveCache,
    listing: &VolumeListing,
    out: &Path,
    options: &BuildOptions,
    cancel: &dyn Cancellation,
    mut progress: Option<&mut dyn FnMut(IndexProgressEvent)>,
) -> Result<IndexBuildStats> {
    let indexes = listing.indexes();
    let blocks = listing.blocks();

    let stats = if !options.from_blocks && !indexes.is_empty() {
        let names: Vec<&str> = indexes.iter().map(|(n, _)| n.as_str()).collect();
        build_from_index_volumes(cache, listing, &names, out, cancel, &mut progress)?
    } else if !blocks.is_empty() {
        let names: Vec<&str> = blocks.iter().map(|(n, _)| n.as_str()).collect();
        match options.mode {
            BuildMode::Set => build_with_set(cache, &names, out, cancel, &mut progress)?,
            BuildMode::Merge => build_with_merge(cache, &names, out, cancel, &mut progress)?,
        }
    } else {
        return Err(RecoveryError::NoIndex(
            "no block or index volumes to build an index from".into(),
        ));
    };

    info!(
        records = stats.records,
        containers = stats.containers_scanned,
        failed = stats.errors.len(),
        "hash index written to {}",
        out.display()
    );
    Ok(stats)
}

/// Lines for every block stored in one block container.
fn block_container_lines(cache: &ArchiveCache, container: &str) -> Result<Vec<String>> {
    let lease = cache.lease(container)?;
    let mut archive = lease.lock();
    let lines = archive
        .reader()
        .list_entries(None)
        .filter(|e| e.name != MANIFEST_ENTRY && BlockHash::from_entry_name(&e.name).is_ok())
        .map(|e| format_line(&entry_name_to_base64(&e.name), container))
        .collect();
    Ok(lines)
}

/// Lines for every block listed by one index container, naming each block
/// volume as it appears in the folder.
fn index_container_lines(
    cache: &ArchiveCache,
    names: &NameResolver<'_>,
    container: &str,
) -> Result<Vec<String>> {
    let lease = cache.lease(container)?;
    let mut archive = lease.lock();
    let reader = archive.reader();
    let vols: Vec<String> = reader
        .list_entries(Some(VOL_PREFIX))
        .map(|e| e.name.clone())
        .collect();

    let mut lines = Vec::new();
    for entry in vols {
        let volume = names.resolve(&entry[VOL_PREFIX.len()..]);
        let doc: IndexVolume = serde_json::from_slice(&reader.read_entry(&entry)?)?;
        for block in &doc.blocks {
            BlockHash::from_base64(&block.hash)?;
            lines.push(format_line(&block.hash, volume));
        }
    }
    Ok(lines)
}

/// Scan containers one by one, recording per-container failures.
/// Usage-type failures (such as a missing passphrase) and interruption
/// abort the scan.
fn scan_containers(
    names: &[&str],
    cancel: &dyn Cancellation,
    progress: &mut Option<&mut dyn FnMut(IndexProgressEvent)>,
    errors: &mut Vec<(String, String)>,
    mut visit: impl FnMut(&str) -> Result<()>,
) -> Result<usize> {
    let mut scanned = 0;
    for (i, name) in names.iter().enumerate() {
        cancel.check()?;
        emit_progress(
            progress,
            IndexProgressEvent::ContainerStarted {
                current: i + 1,
                total: names.len(),
                name: name.to_string(),
            },
        );
        match visit(name) {
            Ok(()) => scanned += 1,
            Err(e) if e.is_usage() || matches!(e, RecoveryError::Interrupted) => return Err(e),
            Err(e) => {
                warn!(volume = %name, error = %e, "skipping unreadable container");
                emit_progress(
                    progress,
                    IndexProgressEvent::ContainerFailed {
                        name: name.to_string(),
                        error: e.to_string(),
                    },
                );
                errors.push((name.to_string(), e.to_string()));
            }
        }
    }
    Ok(scanned)
}

fn write_set(out: &Path, set: &BTreeSet<String>) -> Result<()> {
    let tmp = NamedTempFile::new_in(parent_dir(out))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        for line in set {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
    }
    tmp.persist(out).map_err(|e| e.error)?;
    Ok(())
}

fn build_from_index_volumes(
    cache: &ArchiveCache,
    listing: &VolumeListing,
    names: &[&str],
    out: &Path,
    cancel: &dyn Cancellation,
    progress: &mut Option<&mut dyn FnMut(IndexProgressEvent)>,
) -> Result<IndexBuildStats> {
    let resolver = listing.name_resolver();
    let mut set = BTreeSet::new();
    let mut errors = Vec::new();
    let scanned = scan_containers(names, cancel, progress, &mut errors, |name| {
        set.extend(index_container_lines(cache, &resolver, name)?);
        Ok(())
    })?;
    let records = set.len() as u64;
    emit_progress(progress, IndexProgressEvent::Writing { records });
    write_set(out, &set)?;
    Ok(IndexBuildStats {
        source: IndexSource::IndexVolumes,
        containers_scanned: scanned,
        records,
        errors,
    })
}

fn build_with_set(
    cache: &ArchiveCache,
    names: &[&str],
    out: &Path,
    cancel: &dyn Cancellation,
    progress: &mut Option<&mut dyn FnMut(IndexProgressEvent)>,
) -> Result<IndexBuildStats> {
    let mut set = BTreeSet::new();
    let mut errors = Vec::new();
    let scanned = scan_containers(names, cancel, progress, &mut errors, |name| {
        set.extend(block_container_lines(cache, name)?);
        Ok(())
    })?;
    let records = set.len() as u64;
    emit_progress(progress, IndexProgressEvent::Writing { records });
    write_set(out, &set)?;
    Ok(IndexBuildStats {
        source: IndexSource::BlockVolumes,
        containers_scanned: scanned,
        records,
        errors,
    })
}

fn build_with_merge(
    cache: &ArchiveCache,
    names: &[&str],
    out: &Path,
    cancel: &dyn Cancellation,
    progress: &mut Option<&mut dyn FnMut(IndexProgressEvent)>,
) -> Result<IndexBuildStats> {
    let dir = parent_dir(out);
    let global = NamedTempFile::new_in(dir)?;
    let mut records = 0u64;
    let mut errors = Vec::new();

    let scanned = scan_containers(names, cancel, progress, &mut errors, |name| {
        let part = NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(part.as_file());
            for line in block_container_lines(cache, name)? {
                w.write_all(line.as_bytes())?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
        }
        sort_file(part.path(), part.path(), cancel)?;
        records = merge_sorted(global.path(), part.path(), global.path())?;
        Ok(())
    })?;

    emit_progress(progress, IndexProgressEvent::Writing { records });
    global.persist(out).map_err(|e| e.error)?;
    Ok(IndexBuildStats {
        source: IndexSource::BlockVolumes,
        containers_scanned: scanned,
        records,
        errors,
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
