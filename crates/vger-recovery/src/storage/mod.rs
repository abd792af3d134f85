pub mod local_backend;

use std::path::Path;

use crate::error::{RecoveryError, Result};

pub use local_backend::LocalBackend;

/// Where backup volumes live. Implementations own retries; callers treat
/// every call as reliable.
pub trait StorageBackend: Send + Sync {
    /// Names of all objects (flat namespace).
    fn list(&self) -> Result<Vec<String>>;

    /// Copy object `name` into the local file `dest`.
    fn get(&self, name: &str, dest: &Path) -> Result<()>;

    /// Upload the local file `src` as object `name`.
    fn put(&self, name: &str, src: &Path) -> Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Build a storage backend from a location string. Only local paths
/// (optionally `file://`) are understood.
pub fn backend_from_url(url: &str) -> Result<Box<dyn StorageBackend>> {
    let path = url.strip_prefix("file://").unwrap_or(url);
    if path.contains("://") {
        return Err(RecoveryError::Usage(format!(
            "unsupported storage location: '{url}'"
        )));
    }
    Ok(Box::new(LocalBackend::new(path)?))
}
