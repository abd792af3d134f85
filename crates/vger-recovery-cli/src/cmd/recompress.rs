use std::path::Path;

use vger_recovery::commands::recompress;
use vger_recovery::compress::Compression;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::rewrite::RewriteProgressEvent;

use super::{cancel, open_set, output_cipher, Outcome};
use crate::format::print_errors;

pub(crate) fn run_recompress(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    folder: &str,
    output: &str,
    compression: &str,
    encrypt: bool,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let compression = Compression::from_config(compression, config.compression.zstd_level)?;
    let set = open_set(folder, config, prefix)?;
    let cipher = if encrypt {
        Some(output_cipher(&set, config, output)?)
    } else {
        None
    };

    let mut on_progress = |event: RewriteProgressEvent| match event {
        RewriteProgressEvent::ContainerStarted {
            current,
            total,
            name,
        } => eprintln!("[{current}/{total}] Rewriting '{name}'..."),
        RewriteProgressEvent::ContainerSkipped { name } => {
            eprintln!("  '{name}' already rewritten, skipped")
        }
        RewriteProgressEvent::ContainerFailed { name, error } => {
            eprintln!("  '{name}' failed: {error}")
        }
    };

    let stats = recompress::run(
        &set,
        Path::new(output),
        compression,
        cipher.as_deref(),
        &cancel(),
        Some(&mut on_progress),
    )?;

    print_errors(&stats.errors);
    println!(
        "Recompress complete: {} volumes written, {} skipped, {} errors",
        stats.written,
        stats.skipped,
        stats.errors.len(),
    );
    Ok(Outcome::from_run(stats.errors.len(), stats.interrupted))
}
