use vger_recovery::commands;
use vger_recovery::config::RecoveryConfig;
use vger_recovery::index::build::{BuildMode, BuildOptions, IndexProgressEvent, IndexSource};

use super::{cancel, open_set, Outcome};
use crate::cli::IndexMode;
use crate::format::print_errors;

pub(crate) fn run_index(
    config: &RecoveryConfig,
    prefix: Option<&str>,
    folder: &str,
    from_blocks: bool,
    mode: IndexMode,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let set = open_set(folder, config, prefix)?;
    let options = BuildOptions {
        mode: match mode {
            IndexMode::Set => BuildMode::Set,
            IndexMode::Merge => BuildMode::Merge,
        },
        from_blocks,
    };

    let mut on_progress = |event: IndexProgressEvent| match event {
        IndexProgressEvent::ContainerStarted {
            current,
            total,
            name,
        } => eprintln!("[{current}/{total}] Reading '{name}'..."),
        IndexProgressEvent::ContainerFailed { name, error } => {
            eprintln!("  '{name}' failed: {error}")
        }
        IndexProgressEvent::Writing { records } => {
            eprintln!("Writing {records} index records...")
        }
    };

    let stats = commands::index::run(&set, config, &options, &cancel(), Some(&mut on_progress))?;

    let source = match stats.source {
        IndexSource::IndexVolumes => "index volumes",
        IndexSource::BlockVolumes => "block volumes",
    };
    print_errors(&stats.errors);
    println!(
        "Index complete: {} records from {} {}, {} errors -> {}",
        stats.records,
        stats.containers_scanned,
        source,
        stats.errors.len(),
        set.index_path(config).display(),
    );
    Ok(Outcome::from_run(stats.errors.len(), false))
}
