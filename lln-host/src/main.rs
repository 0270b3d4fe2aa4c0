//! # lln-host
//!
//! Runs LLN scripts against a builtin set of Rust commands.
//!
//! ## Configuration
//!
//! The host reads configuration from `$XDG_CONFIG_HOME/lln-host/config.toml`,
//! or from the file given with `--config`. A documented default is written
//! when the file is missing.
//!
//! ## Running
//!
//! ```bash
//! # Build the shim if needed and run a script
//! lln-host run hello.lln
//!
//! # Abort on the first unknown command
//! lln-host --strict run hello.lln
//!
//! # With debug logging
//! RUST_LOG=debug lln-host run hello.lln
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lln_command_api::BuildOutcome;
use lln_host::config::Config;
use lln_host::host::Host;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lln-host")]
#[command(version)]
#[command(about = "Run LLN scripts against builtin Rust commands")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/lln-host/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Abort on unknown commands and mistyped arguments
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the shim if needed, then run a script
    Run { script: PathBuf },
    /// Generate and compile the shim only
    Build,
    /// Print the generated shim source
    Gen {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the registered commands and their fingerprint
    Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting lln-host v{}", env!("CARGO_PKG_VERSION"));

    let host = Host::new(&config, cli.strict)?;

    match cli.command {
        Command::Run { script } => {
            let report = host.run(&script)?;
            for diagnostic in &report.diagnostics {
                eprint!("{}", diagnostic.render());
            }
            println!(
                "{} command(s) run, {} statement(s) skipped",
                report.invocations,
                report.skipped()
            );
            if report.count("!printf") > 0 {
                println!("Total: {}", host.total());
            }
        }
        Command::Build => {
            let artifact = host.build()?;
            let verb = match artifact.outcome {
                BuildOutcome::Cached => "Up to date",
                BuildOutcome::Rebuilt => "Built",
            };
            println!("{}: {} ({})", verb, artifact.path.display(), artifact.fingerprint);
        }
        Command::Gen { output } => {
            let source = host.shim();
            match output {
                Some(path) => {
                    std::fs::write(&path, source)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote shim to {}", path.display());
                }
                None => print!("{}", source),
            }
        }
        Command::Commands => {
            for spec in host.registry().commands() {
                let kind = if spec.handler.is_async() { " (async)" } else { "" };
                println!("{}{}", spec.signature(), kind);
            }
            println!("fingerprint: {}", host.fingerprint()?);
        }
    }

    Ok(())
}
