use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "vger-recovery",
    version,
    about = "Recover files from vger backup volumes without a local database",
    after_help = "\
Configuration lookup order:
  1. --config <path>             (explicit flag)
  2. $VGER_RECOVERY_CONFIG       (environment variable)
  3. built-in defaults

Environment variables:
  VGER_RECOVERY_CONFIG   Path to configuration file
  VGER_PASSPHRASE        Volume passphrase (skips interactive prompt)

Exit codes:
  0     success
  1     fatal error
  100   usage or precondition error
  130   interrupted
  200   completed with item errors"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides VGER_RECOVERY_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only consider volumes with this filename prefix
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum IndexMode {
    /// Collect all records in memory, write once
    Set,
    /// Sort per container and merge into the running index
    Merge,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Fetch backup volumes from a storage location into a local folder
    Download {
        /// Storage location (local path or file:// URL)
        source: String,

        /// Local folder receiving the volumes
        folder: String,
    },

    /// Build the block hash index of a local backup set
    Index {
        /// Folder holding the backup volumes
        folder: String,

        /// Scan block volumes even when index volumes are present
        #[arg(long)]
        from_blocks: bool,

        /// How records from block volumes are accumulated
        #[arg(long, value_enum, default_value_t = IndexMode::Set)]
        mode: IndexMode,
    },

    /// List backup versions, or the files of one version
    List {
        /// Folder holding the backup volumes
        folder: String,

        /// Version index (0 = newest) or timestamp
        version: Option<String>,

        /// Glob applied to file paths
        filter: Option<String>,
    },

    /// Restore files of one backup version
    Restore {
        /// Folder holding the backup volumes
        folder: String,

        /// Version index (0 = newest) or timestamp
        version: String,

        /// Restore below this directory instead of the original locations
        #[arg(short, long)]
        target: Option<String>,

        /// Glob applied to file paths
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Rewrite every volume with a different compression or encryption
    Recompress {
        /// Folder holding the backup volumes
        folder: String,

        /// Output folder for the rewritten volumes
        output: String,

        /// Compression for the new volumes (none, lz4, zstd)
        compression: String,

        /// Encrypt the new volumes
        #[arg(long)]
        encrypt: bool,
    },

    /// Rewrite the backup set with larger blocks
    Rechunk {
        /// Folder holding the backup volumes
        folder: String,

        /// Output folder for the new backup set
        output: String,

        /// Number of source blocks combined into one new block
        factor: usize,

        /// Encrypt the new volumes
        #[arg(long)]
        encrypt: bool,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Download { .. } => "download",
            Commands::Index { .. } => "index",
            Commands::List { .. } => "list",
            Commands::Restore { .. } => "restore",
            Commands::Recompress { .. } => "recompress",
            Commands::Rechunk { .. } => "rechunk",
        }
    }
}
