mod cli;
mod cmd;
mod dispatch;
mod format;
mod passphrase;
mod prompt;
mod signal;

use clap::Parser;

use vger_recovery::config;
use vger_recovery::error::RecoveryError;

use cli::Cli;
use cmd::Outcome;
use dispatch::dispatch_command;

const EXIT_FATAL: i32 = 1;
const EXIT_USAGE: i32 = 100;
const EXIT_INTERRUPTED: i32 = 130;
const EXIT_ITEM_ERRORS: i32 = 200;

fn exit_code_for(error: &(dyn std::error::Error + 'static)) -> i32 {
    match error.downcast_ref::<RecoveryError>() {
        Some(e) if e.is_usage() => EXIT_USAGE,
        Some(RecoveryError::Interrupted) => EXIT_INTERRUPTED,
        _ => EXIT_FATAL,
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    signal::install_signal_handlers();

    let source = config::resolve_config_path(cli.config.as_deref());
    tracing::info!("Using config: {source}");
    let cfg = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_USAGE);
        }
    };

    tracing::debug!(command = cli.command.name(), "dispatching");
    let code = match dispatch_command(&cli.command, &cfg, cli.prefix.as_deref()) {
        Ok(Outcome::Complete) => 0,
        Ok(Outcome::ItemErrors) => EXIT_ITEM_ERRORS,
        Ok(Outcome::Interrupted) => {
            eprintln!("Interrupted; output is incomplete.");
            EXIT_INTERRUPTED
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code_for(&*e)
        }
    };
    std::process::exit(code);
}
