use zeroize::Zeroizing;

use crate::prompt::prompt_hidden;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::error::Result;

pub(crate) const PASSPHRASE_ENV_VAR: &str = "VGER_PASSPHRASE";

/// Passphrase from the config file or the environment, without prompting.
pub(crate) fn configured_passphrase(config: &RecoveryConfig) -> Option<Zeroizing<String>> {
    if let Some(pass) = &config.encryption.passphrase {
        return Some(Zeroizing::new(pass.clone()));
    }
    match std::env::var(PASSPHRASE_ENV_VAR) {
        Ok(pass) if !pass.is_empty() => Some(Zeroizing::new(pass)),
        _ => None,
    }
}

/// Configured passphrase, else an interactive prompt naming `folder`.
pub(crate) fn get_passphrase(
    config: &RecoveryConfig,
    folder: &str,
) -> Result<Option<Zeroizing<String>>> {
    if let Some(pass) = configured_passphrase(config) {
        return Ok(Some(pass));
    }
    let pass = Zeroizing::new(prompt_hidden(&format!(
        "Enter passphrase for '{folder}': "
    ))?);
    Ok(Some(pass))
}

/// Passphrase for a new encrypted set: configured, else prompted twice.
pub(crate) fn get_new_passphrase(
    config: &RecoveryConfig,
    folder: &str,
) -> Result<Zeroizing<String>> {
    if let Some(pass) = configured_passphrase(config) {
        return Ok(pass);
    }
    let p1 = Zeroizing::new(prompt_hidden(&format!(
        "Enter new passphrase for '{folder}': "
    ))?);
    let p2 = Zeroizing::new(prompt_hidden(&format!(
        "Confirm passphrase for '{folder}': "
    ))?);
    if *p1 != *p2 {
        return Err(vger_recovery::error::RecoveryError::Usage(
            "passphrases do not match".into(),
        ));
    }
    Ok(p1)
}
