use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use globset::GlobMatcher;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cache::ArchiveCache;
use crate::cancel::Cancellation;
use crate::config::RecoveryConfig;
use crate::crypto::{AesCipher, Cipher};
use crate::error::{RecoveryError, Result};
use crate::fileset::{read_filelist, read_manifest, FileEntry, Manifest};
use crate::index::build::{build_index, BuildOptions};
use crate::index::HashIndex;
use crate::volume::{list_containers_in_folder, VolumeListing, TIME_FORMAT};

/// Cipher reading (and, for `--encrypt`, writing) AES volumes.
pub fn cipher_from_passphrase(
    passphrase: Zeroizing<String>,
    config: &RecoveryConfig,
) -> Arc<dyn Cipher> {
    Arc::new(AesCipher::new(passphrase, config.encryption.kdf))
}

/// Compile an optional path filter. Separators are not special, so `*.txt`
/// matches at any depth.
pub fn compile_filter(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    pattern
        .map(|p| {
            globset::GlobBuilder::new(p)
                .literal_separator(false)
                .build()
                .map(|g| g.compile_matcher())
        })
        .transpose()
        .map_err(|e| RecoveryError::Usage(format!("invalid filter: {e}")))
}

/// A local folder of backup volumes, listed and ready to read.
pub struct BackupSet {
    folder: PathBuf,
    listing: VolumeListing,
    cache: Arc<ArchiveCache>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl BackupSet {
    /// List `folder` and prepare a container cache over it.
    ///
    /// `passphrase` is only consulted when the listing contains encrypted
    /// volumes, so callers can prompt lazily.
    pub fn open(
        folder: &Path,
        config: &RecoveryConfig,
        prefix: Option<&str>,
        passphrase: impl FnOnce() -> Result<Option<Zeroizing<String>>>,
    ) -> Result<Self> {
        let prefix = prefix.or(config.prefix.as_deref());
        let listing = list_containers_in_folder(folder, prefix)?;
        listing.require_single_prefix()?;
        if listing.is_empty() {
            return Err(RecoveryError::Usage(format!(
                "no backup volumes found in {}",
                folder.display()
            )));
        }

        let encrypted = listing.volumes.iter().any(|(_, v)| v.is_encrypted());
        let cipher = if encrypted {
            passphrase()?.map(|p| cipher_from_passphrase(p, config))
        } else {
            None
        };
        debug!(
            volumes = listing.volumes.len(),
            encrypted,
            "opened backup set in {}",
            folder.display()
        );

        let cache = Arc::new(ArchiveCache::new(
            folder,
            config.cache.max_open_archives,
            cipher.clone(),
        ));
        Ok(Self {
            folder: folder.to_path_buf(),
            listing,
            cache,
            cipher,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn listing(&self) -> &VolumeListing {
        &self.listing
    }

    pub fn cache(&self) -> &Arc<ArchiveCache> {
        &self.cache
    }

    pub fn cipher(&self) -> Option<&Arc<dyn Cipher>> {
        self.cipher.as_ref()
    }

    /// The prefix shared by every volume of the set.
    pub fn prefix(&self) -> Result<&str> {
        self.listing
            .volumes
            .first()
            .map(|(_, v)| v.prefix.as_str())
            .ok_or_else(|| RecoveryError::Usage("backup set is empty".into()))
    }

    pub fn index_path(&self, config: &RecoveryConfig) -> PathBuf {
        self.folder.join(&config.index.file_name)
    }

    /// Open the hash index, building it first when the folder has none.
    pub fn open_index(&self, config: &RecoveryConfig, cancel: &dyn Cancellation) -> Result<HashIndex> {
        let path = self.index_path(config);
        if !path.is_file() {
            info!("no index file found, building {}", path.display());
            build_index(
                &self.cache,
                &self.listing,
                &path,
                &BuildOptions::default(),
                cancel,
                None,
            )?;
        }
        HashIndex::open(&path, &config.index, Arc::clone(&self.cache))
    }

    /// Resolve a version argument to a file-list volume name. Accepts an
    /// index into the newest-first version list or a timestamp.
    pub fn resolve_version(&self, version: &str) -> Result<String> {
        let versions = self.listing.files_newest_first();
        if versions.is_empty() {
            return Err(RecoveryError::Usage("backup set has no file lists".into()));
        }
        if let Ok(i) = version.parse::<usize>() {
            return versions
                .get(i)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| {
                    RecoveryError::Usage(format!(
                        "version {i} out of range (0..{})",
                        versions.len()
                    ))
                });
        }
        let wanted = parse_time(version)
            .ok_or_else(|| RecoveryError::Usage(format!("invalid version: '{version}'")))?;
        versions
            .iter()
            .find(|(_, v)| v.time() == Some(wanted))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RecoveryError::Usage(format!("no backup taken at {wanted}")))
    }

    /// Manifest and file list of one file-list volume.
    pub fn read_fileset(&self, files_volume: &str) -> Result<(Manifest, Vec<FileEntry>)> {
        let lease = self.cache.lease(files_volume)?;
        let mut archive = lease.lock();
        let manifest = read_manifest(archive.reader())?;
        manifest.validate()?;
        let files = read_filelist(archive.reader())?;
        Ok((manifest, files))
    }
}

/// `YYYYMMDDTHHMMSSZ` or RFC 3339.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Fail when `folder` already holds volumes of any backup set.
pub fn require_empty_output(folder: &Path) -> Result<()> {
    if !folder.is_dir() {
        return Ok(());
    }
    let existing = list_containers_in_folder(folder, None)?;
    if !existing.is_empty() {
        return Err(RecoveryError::Usage(format!(
            "output folder {} already contains backup volumes",
            folder.display()
        )));
    }
    Ok(())
}
