//! dirwatch CLI - dw command

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use dirwatch_cli::logging;
use dirwatch_core::Method;
use std::path::PathBuf;
use std::time::Duration;

mod cmd;

/// dirwatch - watch files and directories for changes
#[derive(Parser)]
#[command(name = "dw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/dirwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch paths and print changes until interrupted
    Watch {
        /// Files or directories; missing paths are watched for creation
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Also watch nested directories
        #[arg(short, long)]
        recursive: bool,

        /// Report changes to files inside watched directories
        #[arg(short, long)]
        files: bool,

        /// Preferred backend (native, fam, os-watch, stat)
        #[arg(long)]
        method: Option<Method>,

        /// Poll interval for polled paths, in milliseconds (10-600000)
        #[arg(long, value_parser = clap::value_parser!(u64).range(10..=600_000))]
        interval_ms: Option<u64>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// Probe which notification backends work here
    Methods {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// View the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    List,
    /// Show the config file path
    Path {
        /// Write the example config if the file does not exist
        #[arg(long)]
        create: bool,
    },
    /// Print a commented example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose, cli.log_file.as_deref())?;
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Watch {
            paths,
            recursive,
            files,
            method,
            interval_ms,
            json,
        } => {
            let args = cmd::watch::WatchArgs {
                paths,
                recursive,
                files,
                method,
                interval: interval_ms.map(Duration::from_millis),
                json,
            };
            cmd::watch::run(config, args).await
        }
        Commands::Methods { json } => cmd::methods::run(config, json).await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::List => cmd::config::run_list(config).await,
            ConfigCommands::Path { create } => cmd::config::run_path(config, create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        },
    }
}
