use tracing::info;

use super::util::BackupSet;
use crate::cancel::Cancellation;
use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::index::build::{build_index, BuildOptions, IndexBuildStats, IndexProgressEvent};

/// Run `vger-recovery index`: (re)build the hash index of a backup set.
/// An existing index file is replaced only once the new one is complete.
pub fn run(
    set: &BackupSet,
    config: &RecoveryConfig,
    options: &BuildOptions,
    cancel: &dyn Cancellation,
    progress: Option<&mut dyn FnMut(IndexProgressEvent)>,
) -> Result<IndexBuildStats> {
    let path = set.index_path(config);
    info!(
        mode = ?options.mode,
        from_blocks = options.from_blocks,
        "building hash index at {}",
        path.display()
    );
    build_index(set.cache(), set.listing(), &path, options, cancel, progress)
}
