use argon2::Argon2;
use zeroize::Zeroizing;

use crate::config::KdfConfig;
use crate::error::{RecoveryError, Result};

pub const SALT_LEN: usize = 32;

/// Derive a 32-byte key from a passphrase using Argon2id.
pub fn derive_key_from_passphrase(
    passphrase: &str,
    salt: &[u8; SALT_LEN],
    kdf: &KdfConfig,
) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| RecoveryError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, output.as_mut())
        .map_err(|e| RecoveryError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

/// Serialized form of the KDF parameters stored in every encrypted volume.
pub(crate) fn kdf_to_bytes(kdf: &KdfConfig) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..4].copy_from_slice(&kdf.time_cost.to_le_bytes());
    out[4..8].copy_from_slice(&kdf.memory_cost.to_le_bytes());
    out[8..].copy_from_slice(&kdf.parallelism.to_le_bytes());
    out
}

pub(crate) fn kdf_from_bytes(raw: &[u8; 12]) -> KdfConfig {
    let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
    KdfConfig {
        time_cost: word(0),
        memory_cost: word(4),
        parallelism: word(8),
    }
}
