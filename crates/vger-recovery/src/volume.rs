//! Backup-set volume names.
//!
//! `<prefix>-<stamp>.<type>.<compression>[.<encryption>]`, where the stamp is
//! a UTC timestamp (`20240131T235959Z`) or a volume id (`b` / `i` followed by
//! 32 hex digits) and the type is `dblock`, `dlist` or `dindex`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::error::{RecoveryError, Result};
use crate::storage::StorageBackend;

pub const TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const ID_HEX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    Files,
    Blocks,
    Index,
}

impl FileType {
    pub fn suffix(self) -> &'static str {
        match self {
            FileType::Blocks => "dblock",
            FileType::Files => "dlist",
            FileType::Index => "dindex",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "dblock" => Some(FileType::Blocks),
            "dlist" => Some(FileType::Files),
            "dindex" => Some(FileType::Index),
            _ => None,
        }
    }

    fn id_letter(self) -> Option<char> {
        match self {
            FileType::Blocks => Some('b'),
            FileType::Index => Some('i'),
            FileType::Files => None,
        }
    }
}

/// The part of a volume name between the prefix and the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeStamp {
    Time(DateTime<Utc>),
    /// Hex id without its type letter.
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedVolume {
    pub prefix: String,
    pub file_type: FileType,
    pub stamp: VolumeStamp,
    pub compression: String,
    pub encryption: Option<String>,
}

impl ParsedVolume {
    /// Parse a volume file name. Returns `None` for names that are not ours.
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return None;
        }
        let file_type = FileType::from_suffix(parts[1])?;
        let compression = parts[2];
        if !is_module_tag(compression) {
            return None;
        }
        let encryption = match parts.get(3) {
            Some(ext) if is_module_tag(ext) => Some(ext.to_string()),
            Some(_) => return None,
            None => None,
        };

        let (prefix, stamp_str) = parts[0].rsplit_once('-')?;
        if prefix.is_empty() {
            return None;
        }
        let stamp = parse_stamp(stamp_str, file_type)?;

        Some(Self {
            prefix: prefix.to_string(),
            file_type,
            stamp,
            compression: compression.to_string(),
            encryption,
        })
    }

    /// A block or index volume name whose id is taken from `seed`
    /// (first 16 bytes, zero padded).
    pub fn with_id(
        prefix: &str,
        file_type: FileType,
        seed: &[u8],
        compression: &str,
        encryption: Option<&str>,
    ) -> Self {
        let mut id = [0u8; ID_HEX_LEN / 2];
        let n = seed.len().min(id.len());
        id[..n].copy_from_slice(&seed[..n]);
        Self {
            prefix: prefix.to_string(),
            file_type,
            stamp: VolumeStamp::Id(hex::encode(id)),
            compression: compression.to_string(),
            encryption: encryption.map(str::to_string),
        }
    }

    pub fn with_time(
        prefix: &str,
        file_type: FileType,
        time: DateTime<Utc>,
        compression: &str,
        encryption: Option<&str>,
    ) -> Self {
        Self {
            prefix: prefix.to_string(),
            file_type,
            stamp: VolumeStamp::Time(truncate_to_seconds(time)),
            compression: compression.to_string(),
            encryption: encryption.map(str::to_string),
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.stamp {
            VolumeStamp::Time(t) => Some(t),
            VolumeStamp::Id(_) => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// The same volume under different compression/encryption modules.
    pub fn renamed(&self, compression: &str, encryption: Option<&str>) -> Self {
        Self {
            compression: compression.to_string(),
            encryption: encryption.map(str::to_string),
            ..self.clone()
        }
    }

    /// The name this volume has once its encryption layer is removed.
    pub fn decrypted_name(&self) -> String {
        self.renamed(&self.compression, None).to_string()
    }
}

impl fmt::Display for ParsedVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.prefix)?;
        match &self.stamp {
            VolumeStamp::Time(t) => write!(f, "{}", t.format(TIME_FORMAT))?,
            VolumeStamp::Id(id) => {
                let letter = self.file_type.id_letter().unwrap_or('x');
                write!(f, "{letter}{id}")?
            }
        }
        write!(f, ".{}.{}", self.file_type.suffix(), self.compression)?;
        if let Some(enc) = &self.encryption {
            write!(f, ".{enc}")?;
        }
        Ok(())
    }
}

/// Parse a volume file name; `None` means "not ours, ignore".
pub fn parse_filename(name: &str) -> Option<ParsedVolume> {
    ParsedVolume::parse(name)
}

/// The name a volume has without its encryption suffix. Names that do not
/// parse are returned unchanged.
pub fn plain_volume_name(name: &str) -> String {
    match ParsedVolume::parse(name) {
        Some(v) => v.decrypted_name(),
        None => name.to_string(),
    }
}

fn is_module_tag(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn parse_stamp(s: &str, file_type: FileType) -> Option<VolumeStamp> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIME_FORMAT) {
        return Some(VolumeStamp::Time(naive.and_utc()));
    }
    let letter = file_type.id_letter()?;
    let id = s.strip_prefix(letter)?;
    if id.len() == ID_HEX_LEN && id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        Some(VolumeStamp::Id(id.to_string()))
    } else {
        None
    }
}

fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// A classified enumeration of one folder or storage listing.
#[derive(Debug, Clone, Default)]
pub struct VolumeListing {
    /// `(file name, parsed)` for every volume of the selected prefix.
    pub volumes: Vec<(String, ParsedVolume)>,
    /// Every prefix seen, before prefix filtering.
    pub prefixes: BTreeSet<String>,
    /// Set when more than one prefix was found and none was selected.
    pub ambiguous: bool,
}

impl VolumeListing {
    fn from_names<I: IntoIterator<Item = String>>(names: I, prefix: Option<&str>) -> Self {
        let mut parsed: Vec<(String, ParsedVolume)> = Vec::new();
        let mut prefixes = BTreeSet::new();
        let mut ignored = 0usize;
        for name in names {
            match ParsedVolume::parse(&name) {
                Some(v) => {
                    prefixes.insert(v.prefix.clone());
                    parsed.push((name, v));
                }
                None => ignored += 1,
            }
        }
        if ignored > 0 {
            debug!(ignored, "skipped entries that are not backup volumes");
        }

        let ambiguous = prefix.is_none() && prefixes.len() > 1;
        if ambiguous {
            warn!(
                prefixes = ?prefixes,
                "found volumes from more than one backup set; select one with --prefix"
            );
        }
        if let Some(p) = prefix {
            parsed.retain(|(_, v)| v.prefix == p);
        }
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            volumes: parsed,
            prefixes,
            ambiguous,
        }
    }

    /// Fail when the listing mixes backup sets and no prefix was chosen.
    pub fn require_single_prefix(&self) -> Result<()> {
        if self.ambiguous {
            let found: Vec<&str> = self.prefixes.iter().map(String::as_str).collect();
            return Err(RecoveryError::Usage(format!(
                "found more than one backup set prefix ({}); use --prefix to select one",
                found.join(", ")
            )));
        }
        Ok(())
    }

    pub fn of_type(&self, file_type: FileType) -> impl Iterator<Item = &(String, ParsedVolume)> {
        self.volumes
            .iter()
            .filter(move |(_, v)| v.file_type == file_type)
    }

    pub fn blocks(&self) -> Vec<&(String, ParsedVolume)> {
        self.of_type(FileType::Blocks).collect()
    }

    pub fn indexes(&self) -> Vec<&(String, ParsedVolume)> {
        self.of_type(FileType::Index).collect()
    }

    /// File-list volumes, index 0 being the most recent backup.
    pub fn files_newest_first(&self) -> Vec<&(String, ParsedVolume)> {
        let mut files = self.files_oldest_first();
        files.reverse();
        files
    }

    /// File-list volumes in chronological order.
    pub fn files_oldest_first(&self) -> Vec<&(String, ParsedVolume)> {
        let mut files: Vec<_> = self.of_type(FileType::Files).collect();
        files.sort_by(|a, b| a.1.time().cmp(&b.1.time()).then_with(|| a.0.cmp(&b.0)));
        files
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Map volume names recorded inside the set onto the names present in
    /// this listing.
    pub fn name_resolver(&self) -> NameResolver<'_> {
        let mut present = HashSet::new();
        let mut by_plain = HashMap::new();
        for (name, v) in &self.volumes {
            present.insert(name.as_str());
            by_plain.entry(v.decrypted_name()).or_insert(name.as_str());
        }
        NameResolver { present, by_plain }
    }
}

/// Resolves a recorded volume name to the one actually stored, so that a
/// set whose volumes were decrypted on download still finds them.
pub struct NameResolver<'a> {
    present: HashSet<&'a str>,
    by_plain: HashMap<String, &'a str>,
}

impl<'a> NameResolver<'a> {
    /// The listed name for `name`; unknown names come back unchanged.
    pub fn resolve<'n>(&self, name: &'n str) -> &'n str
    where
        'a: 'n,
    {
        if self.present.contains(name) {
            return name;
        }
        self.by_plain
            .get(&plain_volume_name(name))
            .copied()
            .unwrap_or(name)
    }
}

/// Enumerate and classify the volumes in a local folder.
pub fn list_containers_in_folder(folder: &Path, prefix: Option<&str>) -> Result<VolumeListing> {
    if !folder.is_dir() {
        return Err(RecoveryError::Usage(format!(
            "folder does not exist: {}",
            folder.display()
        )));
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(VolumeListing::from_names(names, prefix))
}

/// Enumerate and classify the volumes of a storage backend.
pub fn list_containers(storage: &dyn StorageBackend, prefix: Option<&str>) -> Result<VolumeListing> {
    let names = storage.list()?;
    Ok(VolumeListing::from_names(names, prefix))
}
