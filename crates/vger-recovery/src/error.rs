use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open container '{name}': {reason}")]
    ContainerOpen { name: String, reason: String },

    #[error("entry '{entry}' not found in container '{container}'")]
    EntryNotFound { container: String, entry: String },

    #[error("block hash not found in index: {0}")]
    HashNotFound(String),

    #[error("corrupt index line {line}: {reason}")]
    IndexCorrupt { line: u64, reason: String },

    #[error("no index available: {0}")]
    NoIndex(String),

    #[error("file hash mismatch for '{path}': expected {expected}, got {actual}")]
    FileHashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{failed} block(s) of '{path}' could not be read, first: {first}")]
    BlocksUnreadable {
        path: String,
        failed: usize,
        first: Box<RecoveryError>,
    },

    #[error("decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("passphrase required to read encrypted volume '{0}'")]
    PassphraseRequired(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Usage(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl RecoveryError {
    /// Usage and precondition failures: reported before any work starts.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            RecoveryError::Usage(_) | RecoveryError::Config(_) | RecoveryError::PassphraseRequired(_)
        )
    }
}
