pub mod aes_gcm;
pub mod key;

use std::path::Path;

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::config::KdfConfig;
use crate::error::{RecoveryError, Result};

pub use self::aes_gcm::AesCipher;

/// Whole-file encryption layer of a volume.
pub trait Cipher: Send + Sync {
    /// Volume file name suffix identifying this cipher (without the dot).
    fn extension(&self) -> &str;

    fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<()>;

    fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// Move a finished plain volume to its final name, encrypting it on the
/// way when `cipher` is set. The sealed name only ever holds a complete
/// volume; on failure the plain file is left in place.
pub fn seal_file(cipher: Option<&dyn Cipher>, plain: &Path, sealed: &Path) -> Result<()> {
    match cipher {
        Some(cipher) => {
            let dir = match sealed.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let tmp = NamedTempFile::new_in(dir)?;
            cipher.encrypt_file(plain, tmp.path())?;
            tmp.persist(sealed).map_err(|e| e.error)?;
            std::fs::remove_file(plain)?;
        }
        None if plain != sealed => std::fs::rename(plain, sealed)?,
        None => {}
    }
    Ok(())
}

/// Build the cipher registered for `extension`.
pub fn cipher_for_extension(
    extension: &str,
    passphrase: Option<&Zeroizing<String>>,
    kdf: KdfConfig,
) -> Result<Box<dyn Cipher>> {
    match extension {
        aes_gcm::EXTENSION => {
            let passphrase = passphrase
                .ok_or_else(|| RecoveryError::PassphraseRequired(format!("*.{extension}")))?;
            Ok(Box::new(AesCipher::new(passphrase.clone(), kdf)))
        }
        other => Err(RecoveryError::Usage(format!(
            "no encryption module for extension '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes half of the output, then fails.
    struct FailingCipher;

    impl Cipher for FailingCipher {
        fn extension(&self) -> &str {
            "aes"
        }

        fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<()> {
            let data = std::fs::read(src)?;
            let mut out = std::fs::File::create(dst)?;
            out.write_all(&data[..data.len() / 2])?;
            Err(RecoveryError::Other("disk full".into()))
        }

        fn decrypt_file(&self, _src: &Path, _dst: &Path) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn failed_seal_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("set-20240101T000000Z.dlist.lz4");
        let sealed = dir.path().join("set-20240101T000000Z.dlist.lz4.aes");
        std::fs::write(&plain, vec![7u8; 4096]).unwrap();

        let err = seal_file(Some(&FailingCipher), &plain, &sealed).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!sealed.exists());
        assert_eq!(std::fs::read(&plain).unwrap(), vec![7u8; 4096]);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
    }

    #[test]
    fn sealing_replaces_the_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sealed = dir.path().join("sealed.aes");
        std::fs::write(&plain, b"volume bytes").unwrap();
        let kdf = KdfConfig {
            time_cost: 1,
            memory_cost: 64,
            parallelism: 1,
        };
        let cipher = AesCipher::new(Zeroizing::new("pw".into()), kdf);

        seal_file(Some(&cipher), &plain, &sealed).unwrap();
        assert!(!plain.exists());
        let back = dir.path().join("back");
        AesCipher::new(Zeroizing::new("pw".into()), kdf)
            .decrypt_file(&sealed, &back)
            .unwrap();
        assert_eq!(std::fs::read(back).unwrap(), b"volume bytes");
    }
}
