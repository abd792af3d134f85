use std::path::Path;

use vger_recovery::commands::restore::{self, RestoreProgressEvent};
use vger_recovery::config::RecoveryConfig;

use super::{cancel, open_set, Outcome};
use crate::format::{format_bytes, print_errors};

pub(crate) fn run_restore(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    folder: &str,
    version: &str,
    target: Option<&str>,
    filter: Option<&str>,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let set = open_set(folder, config, prefix)?;

    let mut on_progress = |event: RestoreProgressEvent| match event {
        RestoreProgressEvent::FileStarted {
            current,
            total,
            path,
        } => eprintln!("[{current}/{total}] {path}"),
        RestoreProgressEvent::FileFailed { path, error } => {
            eprintln!("  '{path}' failed: {error}")
        }
    };

    let stats = restore::run(
        &set,
        config,
        version,
        target.map(Path::new),
        filter,
        &cancel(),
        Some(&mut on_progress),
    )?;

    print_errors(&stats.errors);
    println!(
        "Restored: {} files, {} dirs ({}), {} errors",
        stats.files,
        stats.folders,
        format_bytes(stats.bytes),
        stats.errors.len(),
    );
    Ok(Outcome::from_run(stats.errors.len(), stats.interrupted))
}
