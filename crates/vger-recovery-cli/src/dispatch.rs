use vger_recovery::config::RecoveryConfig;

use crate::cli::Commands;
use crate::cmd::{self, Outcome};

pub(crate) fn dispatch_command(
    command: &Commands,
    config: &RecoveryConfig,
    prefix: Option<&str>,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    match command {
        Commands::Download { source, folder } => {
            cmd::download::run_download(config, prefix, source, folder)
        }
        Commands::Index {
            folder,
            from_blocks,
            mode,
        } => cmd::index::run_index(config, prefix, folder, *from_blocks, *mode),
        Commands::List {
            folder,
            version,
            filter,
        } => cmd::list::run_list(config, prefix, folder, version.as_deref(), filter.as_deref()),
        Commands::Restore {
            folder,
            version,
            target,
            filter,
        } => cmd::restore::run_restore(
            config,
            prefix,
            folder,
            version,
            target.as_deref(),
            filter.as_deref(),
        ),
        Commands::Recompress {
            folder,
            output,
            compression,
            encrypt,
        } => cmd::recompress::run_recompress(config, prefix, folder, output, compression, *encrypt),
        Commands::Rechunk {
            folder,
            output,
            factor,
            encrypt,
        } => cmd::rechunk::run_rechunk(config, prefix, folder, output, *factor, *encrypt),
    }
}
