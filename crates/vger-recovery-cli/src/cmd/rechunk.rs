use std::path::Path;

use vger_recovery::commands::rechunk;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::rechunk::RechunkProgressEvent;

use super::{cancel, open_set, output_cipher, Outcome};
use crate::format::print_errors;

pub(crate) fn run_rechunk(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    folder: &str,
    output: &str,
    factor: usize,
    encrypt: bool,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let set = open_set(folder, config, prefix)?;
    let cipher = if encrypt {
        Some(output_cipher(&set, config, output)?)
    } else {
        None
    };

    let mut on_progress = |event: RechunkProgressEvent| match event {
        RechunkProgressEvent::GenerationStarted {
            current,
            total,
            name,
        } => eprintln!("[{current}/{total}] Rechunking '{name}'..."),
        RechunkProgressEvent::FileFailed { path, error } => {
            eprintln!("  '{path}' failed: {error}")
        }
        RechunkProgressEvent::GenerationWritten { name, files } => {
            eprintln!("  wrote '{name}' ({files} files)")
        }
    };

    let stats = rechunk::run(
        &set,
        config,
        Path::new(output),
        factor,
        cipher.as_deref(),
        &cancel(),
        Some(&mut on_progress),
    )?;

    print_errors(&stats.errors);
    println!(
        "Rechunk complete: {} generations, {} files, {} blocks in {} volumes, {} groups reused, {} errors",
        stats.generations,
        stats.files,
        stats.blocks_written,
        stats.volumes_written,
        stats.groups_reused,
        stats.errors.len(),
    );
    Ok(Outcome::from_run(stats.errors.len(), stats.interrupted))
}
