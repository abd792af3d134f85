use chrono::{DateTime, Utc};

use super::util::{compile_filter, BackupSet};
use crate::error::Result;
use crate::fileset::FileEntry;

/// One backup generation as shown by `list`.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// 0 is the most recent backup.
    pub index: usize,
    pub name: String,
    pub time: Option<DateTime<Utc>>,
    /// `None` when the file list could not be read.
    pub files: Option<usize>,
}

/// Every backup generation, newest first. Unreadable file lists are listed
/// without a file count.
pub fn list_versions(set: &BackupSet) -> Vec<VersionInfo> {
    set.listing()
        .files_newest_first()
        .into_iter()
        .enumerate()
        .map(|(index, (name, parsed))| VersionInfo {
            index,
            name: name.clone(),
            time: parsed.time(),
            files: set.read_fileset(name).ok().map(|(_, files)| files.len()),
        })
        .collect()
}

/// Entries of one version whose path matches `filter` (all when `None`).
pub fn list_files(set: &BackupSet, version: &str, filter: Option<&str>) -> Result<Vec<FileEntry>> {
    let matcher = compile_filter(filter)?;
    let name = set.resolve_version(version)?;
    let (_, files) = set.read_fileset(&name)?;
    Ok(files
        .into_iter()
        .filter(|f| matcher.as_ref().map_or(true, |m| m.is_match(&f.path)))
        .collect())
}
