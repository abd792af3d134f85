use std::path::Path;

use tracing::info;

use super::util::BackupSet;
use crate::archive::PackCodec;
use crate::cancel::Cancellation;
use crate::compress::Compression;
use crate::crypto::Cipher;
use crate::error::Result;
use crate::rewrite::{ContainerRewriter, RewriteProgressEvent, RewriteStats};

/// Run `vger-recovery recompress`: write every volume of `set` into
/// `output` under `compression`, encrypted with `cipher` when given.
/// Targets already present in `output` are kept, so an interrupted run can
/// simply be repeated.
pub fn run(
    set: &BackupSet,
    output: &Path,
    compression: Compression,
    cipher: Option<&dyn Cipher>,
    cancel: &dyn Cancellation,
    progress: Option<&mut dyn FnMut(RewriteProgressEvent)>,
) -> Result<RewriteStats> {
    info!(
        compression = compression.extension(),
        encrypted = cipher.is_some(),
        "recompressing {} into {}",
        set.folder().display(),
        output.display()
    );
    let mut rewriter = ContainerRewriter::new(set.cache(), output, PackCodec::new(compression), cipher)?;
    rewriter.rewrite_set(set.listing(), cancel, progress)
}
