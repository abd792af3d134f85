use std::path::Path;

use vger_recovery::commands::download::{self, DownloadProgressEvent};
use vger_recovery::commands::util::cipher_from_passphrase;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::storage::backend_from_url;

use super::{cancel, Outcome};
use crate::format::{format_bytes, print_errors};
use crate::passphrase::configured_passphrase;

pub(crate) fn run_download(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    source: &str,
    folder: &str,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let storage = backend_from_url(source)?;
    // Without a configured passphrase encrypted volumes are stored as-is.
    let cipher = configured_passphrase(config).map(|p| cipher_from_passphrase(p, config));
    let prefix = prefix.or(config.prefix.as_deref());

    let mut on_progress = |event: DownloadProgressEvent| match event {
        DownloadProgressEvent::VolumeStarted {
            current,
            total,
            name,
        } => eprintln!("[{current}/{total}] Downloading '{name}'..."),
        DownloadProgressEvent::VolumeSkipped { name } => {
            eprintln!("  '{name}' already present, skipped")
        }
        DownloadProgressEvent::VolumeFailed { name, error } => {
            eprintln!("  '{name}' failed: {error}")
        }
    };

    let stats = download::run(
        storage.as_ref(),
        Path::new(folder),
        prefix,
        cipher.as_deref(),
        &cancel(),
        Some(&mut on_progress),
    )?;

    print_errors(&stats.errors);
    println!(
        "Download complete: {} volumes ({}), {} decrypted, {} skipped, {} errors",
        stats.downloaded,
        format_bytes(stats.bytes),
        stats.decrypted,
        stats.skipped,
        stats.errors.len(),
    );
    Ok(Outcome::from_run(stats.errors.len(), stats.interrupted))
}
