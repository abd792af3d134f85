use super::types::{CompressionAlgorithm, LookupMode};
use crate::error::{RecoveryError, Result};

pub(super) fn default_max_open_archives() -> usize {
    200
}

pub(super) fn default_lookup_mode() -> LookupMode {
    LookupMode::Auto
}

pub(super) fn default_sparse_samples() -> usize {
    2048
}

pub(super) fn default_memory_threshold_bytes() -> u64 {
    256 * 1024 * 1024 // 256 MiB
}

pub(super) fn default_index_file_name() -> String {
    "index.txt".to_string()
}

pub(super) fn default_algorithm() -> CompressionAlgorithm {
    CompressionAlgorithm::Lz4
}

pub(super) fn default_zstd_level() -> i32 {
    3
}

pub(super) fn default_volume_size() -> String {
    "50MiB".to_string()
}

pub(super) fn default_kdf_time_cost() -> u32 {
    3
}

pub(super) fn default_kdf_memory_cost() -> u32 {
    65536 // 64 MiB
}

pub(super) fn default_kdf_parallelism() -> u32 {
    4
}

/// Parse a byte size like "4096", "100KiB", "50MB" or "1g".
///
/// Decimal (`kb`, `mb`, `gb`) and binary (`kib`, `mib`, `gib`) suffixes are
/// accepted case-insensitively; a bare `k`/`m`/`g` is binary.
pub fn parse_human_size(raw: &str) -> Result<u64> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(RecoveryError::Usage("size must not be empty".into()));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (num_part, unit) = input.split_at(split);
    let value: u64 = num_part
        .parse()
        .map_err(|_| RecoveryError::Usage(format!("invalid size: '{raw}'")))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1000,
        "mb" => 1000 * 1000,
        "gb" => 1000 * 1000 * 1000,
        "k" | "kib" => 1024,
        "m" | "mib" => 1024 * 1024,
        "g" | "gib" => 1024 * 1024 * 1024,
        other => {
            return Err(RecoveryError::Usage(format!(
                "invalid size unit '{other}' in '{raw}'"
            )))
        }
    };

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| RecoveryError::Usage(format!("size too large: '{raw}'")))?;
    if bytes == 0 {
        return Err(RecoveryError::Usage(format!("size must be positive: '{raw}'")));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_human_size("4096").unwrap(), 4096);
        assert_eq!(parse_human_size("100KiB").unwrap(), 100 * 1024);
        assert_eq!(parse_human_size("100kb").unwrap(), 100_000);
        assert_eq!(parse_human_size("50MiB").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_human_size(" 2g ").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_garbage_sizes() {
        for bad in ["", "abc", "10xb", "0", "-5", "99999999999999999999"] {
            let err = parse_human_size(bad).unwrap_err();
            assert!(err.is_usage(), "{bad}: {err}");
        }
    }
}
