use std::fmt;
use std::path::{Path, PathBuf};

use super::types::RecoveryConfig;
use crate::error::{RecoveryError, Result};

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "VGER_RECOVERY_CONFIG";

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `--config <path>`
    Explicit(PathBuf),
    /// `$VGER_RECOVERY_CONFIG`
    Env(PathBuf),
    /// No file; built-in defaults.
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Env(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::Env(p) => write!(f, "{} (${CONFIG_ENV_VAR})", p.display()),
            ConfigSource::Defaults => f.write_str("built-in defaults"),
        }
    }
}

/// Resolve the config location: explicit flag, then environment, then defaults.
pub fn resolve_config_path(explicit: Option<&str>) -> ConfigSource {
    if let Some(p) = explicit {
        return ConfigSource::Explicit(PathBuf::from(p));
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(p) if !p.is_empty() => ConfigSource::Env(PathBuf::from(p)),
        _ => ConfigSource::Defaults,
    }
}

/// Load the configuration for `source`.
pub fn load_config(source: &ConfigSource) -> Result<RecoveryConfig> {
    let Some(path) = source.path() else {
        return Ok(RecoveryConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| RecoveryError::Config(format!("cannot read '{}': {e}", path.display())))?;
    if contents.trim().is_empty() {
        return Ok(RecoveryConfig::default());
    }
    let config: RecoveryConfig = serde_yaml::from_str(&contents)
        .map_err(|e| RecoveryError::Config(format!("invalid config '{}': {e}", path.display())))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressionAlgorithm, LookupMode};

    #[test]
    fn defaults_without_file() {
        let cfg = load_config(&ConfigSource::Defaults).unwrap();
        assert_eq!(cfg.cache.max_open_archives, 200);
        assert_eq!(cfg.index.sparse_samples, 2048);
        assert_eq!(cfg.index.file_name, "index.txt");
        assert_eq!(cfg.rechunk.volume_size_bytes().unwrap(), 50 * 1024 * 1024);
    }

    #[test]
    fn explicit_flag_wins() {
        let source = resolve_config_path(Some("/tmp/x.yaml"));
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/tmp/x.yaml")));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.yaml");
        std::fs::write(
            &path,
            "prefix: nightly\ncache:\n  max_open_archives: 3\nindex:\n  lookup: sparse\ncompression:\n  algorithm: lz4\n",
        )
        .unwrap();
        let cfg = load_config(&ConfigSource::Explicit(path)).unwrap();
        assert_eq!(cfg.prefix.as_deref(), Some("nightly"));
        assert_eq!(cfg.cache.max_open_archives, 3);
        assert_eq!(cfg.index.lookup, LookupMode::Sparse);
        assert_eq!(cfg.index.sparse_samples, 2048);
        assert_eq!(cfg.compression.algorithm, CompressionAlgorithm::Lz4);
        assert_eq!(cfg.compression.zstd_level, 3);
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "cache: [1, 2\n").unwrap();
        let err = load_config(&ConfigSource::Explicit(path)).unwrap_err();
        assert!(matches!(err, RecoveryError::Config(_)));
        assert!(err.is_usage());
    }
}
