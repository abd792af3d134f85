use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{RecoveryError, Result};
use crate::storage::StorageBackend;

/// Storage backend for a local directory using `std::fs` directly.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path.
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        // Canonicalize if the path already exists for clearer errors.
        let root = if root_path.exists() {
            fs::canonicalize(&root_path)?
        } else {
            root_path
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that could escape the root directory.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(RecoveryError::InvalidFormat("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(RecoveryError::InvalidFormat(format!(
                "unsafe storage key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(RecoveryError::InvalidFormat(format!(
                "unsafe storage key: contains backslash '{key}'"
            )));
        }
        for component in Path::new(key).components() {
            if component == Component::ParentDir {
                return Err(RecoveryError::InvalidFormat(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Copy `src` to `dest` through a temp file in the destination directory so
/// readers never observe a partial file.
pub(crate) fn atomic_copy(src: &Path, dest: &Path) -> Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut reader = fs::File::open(src)?;
    std::io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

impl StorageBackend for LocalBackend {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        if let Some(name) = entry.file_name().to_str() {
                            names.push(name.to_string());
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, name: &str, dest: &Path) -> Result<()> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(RecoveryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("object not found: {name}"),
            )));
        }
        atomic_copy(&path, dest)
    }

    fn put(&self, name: &str, src: &Path) -> Result<()> {
        let path = self.resolve(name)?;
        atomic_copy(src, &path)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_unsafe_keys() {
        assert!(LocalBackend::validate_key("/etc/passwd").is_err());
        assert!(LocalBackend::validate_key("\\Windows\\System32").is_err());
        assert!(LocalBackend::validate_key("../../outside").is_err());
        assert!(LocalBackend::validate_key("foo/../../etc/passwd").is_err());
        assert!(LocalBackend::validate_key("foo\\bar").is_err());
        assert!(LocalBackend::validate_key("").is_err());
    }

    #[test]
    fn validate_key_accepts_volume_names() {
        assert!(LocalBackend::validate_key("vger-20240101T000000Z.dlist.lz4").is_ok());
        assert!(LocalBackend::validate_key(
            "vger-b0123456789abcdef0123456789abcdef.dblock.zstd.aes"
        )
        .is_ok());
    }

    #[test]
    fn put_get_list_delete() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(remote.path().to_str().unwrap()).unwrap();

        let src = local.path().join("src");
        fs::write(&src, b"volume bytes").unwrap();
        backend.put("b", &src).unwrap();
        backend.put("a", &src).unwrap();
        assert_eq!(backend.list().unwrap(), vec!["a", "b"]);

        let dest = local.path().join("nested").join("copy");
        backend.get("a", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"volume bytes");

        backend.delete("a").unwrap();
        backend.delete("a").unwrap();
        assert_eq!(backend.list().unwrap(), vec!["b"]);
    }

    #[test]
    fn get_missing_is_error() {
        let remote = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(remote.path().to_str().unwrap()).unwrap();
        assert!(backend.get("nope", &remote.path().join("x")).is_err());
    }

    #[test]
    fn list_missing_root_is_empty() {
        let remote = tempfile::tempdir().unwrap();
        let backend =
            LocalBackend::new(remote.path().join("missing").to_str().unwrap()).unwrap();
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn resolve_rejects_traversal() {
        let remote = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(remote.path().to_str().unwrap()).unwrap();
        assert!(backend.get("../../etc/passwd", &remote.path().join("x")).is_err());
        assert!(backend.delete("/absolute").is_err());
    }

    #[test]
    fn backend_from_url_rejects_remote_schemes() {
        assert!(crate::storage::backend_from_url("s3://bucket/path").is_err());
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert!(crate::storage::backend_from_url(&url).is_ok());
    }
}
