mod cmd;
mod output;
mod session;

use clap::{Parser, Subcommand};
use sequencer_core::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sequencer",
    about = "Build, check and run instruction sequences stored as YAML or JSON documents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Engine configuration file
    #[arg(long, global = true, env = "SEQUENCER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter sequence document
    Init {
        /// Destination (.yaml, .yml or .json)
        file: PathBuf,

        /// Name of the root container
        #[arg(long, default_value = "Night sequence")]
        name: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load a document and check every node in it
    Validate { file: PathBuf },

    /// Print the tree of a document
    Show { file: PathBuf },

    /// List the registered node types
    Types,

    /// Run a document to completion (Ctrl+C cancels)
    Run {
        file: PathBuf,

        /// Seed the external state before the run (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init { file, name, force } => {
            cmd::init::run(&cli.config, &file, &name, force, cli.json)
        }
        Commands::Validate { file } => cmd::validate::run(&cli.config, &file, cli.json),
        Commands::Show { file } => cmd::show::run(&cli.config, &file, cli.json),
        Commands::Types => cmd::types::run(&cli.config, cli.json),
        Commands::Run { file, sets } => cmd::run::run(&cli.config, &file, &sets, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
