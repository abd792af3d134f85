use vger_recovery::commands::list;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::fileset::EntryType;

use super::{open_set, Outcome};
use crate::format::{format_bytes, format_time};

pub(crate) fn run_list(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    folder: &str,
    version: Option<&str>,
    filter: Option<&str>,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let set = open_set(folder, config, prefix)?;

    let Some(version) = version else {
        let versions = list::list_versions(&set);
        println!("{:>5}  {:<19}  {:>8}  Volume", "#", "Date", "Files");
        for v in &versions {
            let files = v.files.map_or_else(|| "?".to_string(), |n| n.to_string());
            println!(
                "{:>5}  {:<19}  {:>8}  {}",
                v.index,
                format_time(v.time),
                files,
                v.name
            );
        }
        let unreadable = versions.iter().filter(|v| v.files.is_none()).count();
        return Ok(Outcome::from_run(unreadable, false));
    };

    let files = list::list_files(&set, version, filter)?;
    for entry in &files {
        match entry.entry_type {
            EntryType::File => println!("{}  ({})", entry.path, format_bytes(entry.size)),
            EntryType::Folder => println!("{}/", entry.path.trim_end_matches('/')),
            EntryType::Symlink => println!("{}  (symlink)", entry.path),
        }
    }
    eprintln!("{} entries", files.len());
    Ok(Outcome::Complete)
}
