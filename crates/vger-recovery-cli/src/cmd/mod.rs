pub(crate) mod download;
pub(crate) mod index;
pub(crate) mod list;
pub(crate) mod rechunk;
pub(crate) mod recompress;
pub(crate) mod restore;

use std::path::Path;
use std::sync::Arc;

use vger_recovery::cancel::StaticCancel;
use vger_recovery::commands::util::cipher_from_passphrase;
use vger_recovery::commands::BackupSet;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::crypto::Cipher;

use crate::passphrase::{get_new_passphrase, get_passphrase};
use crate::signal::SHUTDOWN;

/// How a command that processes many items ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Complete,
    ItemErrors,
    Interrupted,
}

impl Outcome {
    pub fn from_run(errors: usize, interrupted: bool) -> Self {
        if interrupted {
            Outcome::Interrupted
        } else if errors > 0 {
            Outcome::ItemErrors
        } else {
            Outcome::Complete
        }
    }
}

pub(crate) fn cancel() -> StaticCancel {
    StaticCancel::new(&SHUTDOWN)
}

/// Open the backup set in `folder`, prompting for a passphrase only when
/// it holds encrypted volumes.
pub(crate) fn open_set(
    folder: &str,
    config: &RecoveryConfig,
    prefix: Option<&str>,
) -> Result<BackupSet, Box<dyn std::error::Error>> {
    let set = BackupSet::open(Path::new(folder), config, prefix, || {
        get_passphrase(config, folder)
    })?;
    Ok(set)
}

/// Cipher for new encrypted volumes: the source set's when it has one,
/// else one from a fresh passphrase.
pub(crate) fn output_cipher(
    set: &BackupSet,
    config: &RecoveryConfig,
    output: &str,
) -> Result<Arc<dyn Cipher>, Box<dyn std::error::Error>> {
    if let Some(cipher) = set.cipher() {
        return Ok(Arc::clone(cipher));
    }
    let pass = get_new_passphrase(config, output)?;
    Ok(cipher_from_passphrase(pass, config))
}
