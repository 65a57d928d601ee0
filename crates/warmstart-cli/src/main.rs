//! Warmstart command-line driver
//!
//! Runs the bootstrap steps against a `warmstart.toml` configuration:
//! full bootstrap, sync, status, legacy cleanup, ledger inspection and
//! manifest generation.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "WARMSTART_LOG";

#[derive(Parser)]
#[command(name = "warmstart")]
#[command(about = "Prepare and synchronize bundled runtime assets", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "warmstart.toml")]
    config: PathBuf,

    /// Debug logging (overridden by WARMSTART_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the variant, clean up, sync and load native libraries
    Bootstrap {
        /// Do not load native libraries
        #[arg(long)]
        skip_libraries: bool,
        /// Print the start context as JSON instead of the search path
        #[arg(long)]
        json: bool,
    },

    /// Clean up and sync the pre-extract assets
    Sync,

    /// Show which assets a sync would extract
    Status,

    /// Remove paths left by earlier releases
    Clean,

    /// List ledger entries
    Ledger,

    /// Generate a manifest for a directory
    Manifest {
        /// Directory to fingerprint
        dir: PathBuf,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Manifest file name to skip inside the directory
        #[arg(long, default_value = "build.json")]
        name: String,
        /// Extra metadata as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Bootstrap {
            skip_libraries,
            json,
        } => commands::bootstrap::execute(&cli.config, skip_libraries, json),
        Commands::Sync => commands::sync::execute(&cli.config),
        Commands::Status => commands::status::execute(&cli.config),
        Commands::Clean => commands::clean::execute(&cli.config),
        Commands::Ledger => commands::ledger::execute(&cli.config),
        Commands::Manifest {
            dir,
            output,
            name,
            metadata,
        } => commands::manifest::execute(&dir, output.as_deref(), &name, &metadata),
    }
}
