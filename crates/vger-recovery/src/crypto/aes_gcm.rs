//! AES-256-GCM volume encryption.
//!
//! Layout: `[8B magic][32B salt][12B kdf params]` followed by frames of
//! `[4B LE ciphertext length][12B nonce][ciphertext + 16B tag]`. Each frame
//! holds up to `FRAME_SIZE` plaintext bytes; its AAD binds the frame index
//! and a final-frame flag so truncation and reordering are detected.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

use super::key::{derive_key_from_passphrase, kdf_from_bytes, kdf_to_bytes, SALT_LEN};
use super::Cipher;
use crate::config::KdfConfig;
use crate::error::{RecoveryError, Result};

pub const EXTENSION: &str = "aes";

const MAGIC: &[u8; 8] = b"VGERAES\x01";
const FRAME_SIZE: usize = 1024 * 1024;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

type KeyCacheKey = ([u8; SALT_LEN], [u8; 12]);

/// Passphrase-based volume cipher. Derived keys are cached per salt, so a
/// run pays for one Argon2 derivation per distinct salt.
pub struct AesCipher {
    passphrase: Zeroizing<String>,
    kdf: KdfConfig,
    /// Salt used for every volume this instance encrypts.
    write_salt: [u8; SALT_LEN],
    keys: Mutex<HashMap<KeyCacheKey, Zeroizing<[u8; 32]>>>,
}

impl AesCipher {
    pub fn new(passphrase: Zeroizing<String>, kdf: KdfConfig) -> Self {
        let mut write_salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut write_salt);
        Self {
            passphrase,
            kdf,
            write_salt,
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn cipher_for(&self, salt: &[u8; SALT_LEN], kdf: &KdfConfig) -> Result<Aes256Gcm> {
        let cache_key = (*salt, kdf_to_bytes(kdf));
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| RecoveryError::Other("key cache lock poisoned".into()))?;
        if !keys.contains_key(&cache_key) {
            debug!("deriving volume key");
            let key = derive_key_from_passphrase(&self.passphrase, salt, kdf)?;
            keys.insert(cache_key, key);
        }
        let key = &keys[&cache_key];
        Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| RecoveryError::KeyDerivation(format!("cipher init: {e}")))
    }
}

fn frame_aad(index: u64, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_le_bytes());
    aad[8] = last as u8;
    aad
}

/// Fill `buf` as far as possible; returns bytes read (short only at EOF).
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

impl Cipher for AesCipher {
    fn extension(&self) -> &str {
        EXTENSION
    }

    fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let cipher = self.cipher_for(&self.write_salt, &self.kdf)?;
        let mut reader = BufReader::new(File::open(src)?);
        let mut writer = BufWriter::new(File::create(dst)?);

        writer.write_all(MAGIC)?;
        writer.write_all(&self.write_salt)?;
        writer.write_all(&kdf_to_bytes(&self.kdf))?;

        // Read one frame ahead so the last frame can be flagged.
        let mut current = vec![0u8; FRAME_SIZE];
        let mut next = vec![0u8; FRAME_SIZE];
        let mut current_len = read_full(&mut reader, &mut current)?;
        let mut index = 0u64;
        loop {
            let next_len = if current_len == FRAME_SIZE {
                read_full(&mut reader, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let mut nonce_bytes = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);
            let aad = frame_aad(index, last);
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&nonce_bytes),
                    Payload {
                        msg: &current[..current_len],
                        aad: &aad,
                    },
                )
                .map_err(|e| RecoveryError::Other(format!("AES-GCM encrypt: {e}")))?;

            writer.write_all(&(ciphertext.len() as u32).to_le_bytes())?;
            writer.write_all(&nonce_bytes)?;
            writer.write_all(&ciphertext)?;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            index += 1;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let mut reader = BufReader::new(File::open(src)?);

        let mut magic = [0u8; 8];
        if read_full(&mut reader, &mut magic)? != magic.len() || &magic != MAGIC {
            return Err(RecoveryError::InvalidFormat(format!(
                "not an encrypted volume: {}",
                src.display()
            )));
        }
        let mut salt = [0u8; SALT_LEN];
        let mut kdf_raw = [0u8; 12];
        if read_full(&mut reader, &mut salt)? != SALT_LEN
            || read_full(&mut reader, &mut kdf_raw)? != kdf_raw.len()
        {
            return Err(RecoveryError::InvalidFormat("truncated encryption header".into()));
        }
        let cipher = self.cipher_for(&salt, &kdf_from_bytes(&kdf_raw))?;

        let mut writer = BufWriter::new(File::create(dst)?);
        let mut index = 0u64;
        let mut saw_last = false;
        loop {
            let mut len_buf = [0u8; 4];
            let n = read_full(&mut reader, &mut len_buf)?;
            if n == 0 {
                break;
            }
            if saw_last || n != 4 {
                return Err(RecoveryError::DecryptionFailed);
            }
            let ct_len = u32::from_le_bytes(len_buf) as usize;
            if !(TAG_LEN..=FRAME_SIZE + TAG_LEN).contains(&ct_len) {
                return Err(RecoveryError::DecryptionFailed);
            }
            let mut nonce_bytes = [0u8; NONCE_LEN];
            let mut ciphertext = vec![0u8; ct_len];
            if read_full(&mut reader, &mut nonce_bytes)? != NONCE_LEN
                || read_full(&mut reader, &mut ciphertext)? != ct_len
            {
                return Err(RecoveryError::DecryptionFailed);
            }

            // The frame is final iff it authenticates with the final flag set.
            let nonce = Nonce::from_slice(&nonce_bytes);
            let plaintext = match cipher.decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: &frame_aad(index, false),
                },
            ) {
                Ok(p) => p,
                Err(_) => {
                    let p = cipher
                        .decrypt(
                            nonce,
                            Payload {
                                msg: &ciphertext,
                                aad: &frame_aad(index, true),
                            },
                        )
                        .map_err(|_| RecoveryError::DecryptionFailed)?;
                    saw_last = true;
                    p
                }
            };
            writer.write_all(&plaintext)?;
            index += 1;
        }
        if !saw_last {
            return Err(RecoveryError::DecryptionFailed);
        }
        writer.flush()?;
        Ok(())
    }
}
