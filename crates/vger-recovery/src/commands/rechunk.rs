use std::path::Path;

use tracing::info;

use super::util::{require_empty_output, BackupSet};
use crate::archive::PackCodec;
use crate::cancel::Cancellation;
use crate::compress::Compression;
use crate::config::RecoveryConfig;
use crate::crypto::Cipher;
use crate::error::Result;
use crate::rechunk::{RechunkProgressEvent, RechunkStats, Rechunker};

/// Run `vger-recovery rechunk`: rewrite every generation of `set` into
/// `output` with blocks `factor` times larger.
///
/// The hash index is opened (or built) before any output is written; if
/// neither an index file nor volumes to build one from exist, the run fails.
pub fn run(
    set: &BackupSet,
    config: &RecoveryConfig,
    output: &Path,
    factor: usize,
    cipher: Option<&dyn Cipher>,
    cancel: &dyn Cancellation,
    progress: Option<&mut dyn FnMut(RechunkProgressEvent)>,
) -> Result<RechunkStats> {
    require_empty_output(output)?;
    let volume_size = config.rechunk.volume_size_bytes()?;
    let compression =
        Compression::from_algorithm(config.compression.algorithm, config.compression.zstd_level);

    let index = set.open_index(config, cancel)?;
    let generations: Vec<&str> = set
        .listing()
        .files_oldest_first()
        .into_iter()
        .map(|(name, _)| name.as_str())
        .collect();
    info!(
        generations = generations.len(),
        factor,
        "rechunking {} into {}",
        set.folder().display(),
        output.display()
    );

    let mut rechunker = Rechunker::new(
        &index,
        output,
        set.prefix()?,
        PackCodec::new(compression),
        cipher,
        factor,
        volume_size,
    )?;
    rechunker.run(&generations, cancel, progress)
}
