//! ost CLI - Static site compiler.
//!
//! Provides commands for:
//! - `build`: Run a single build pass
//! - `serve`: Build, watch for changes and serve the output

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{BuildArgs, ServeArgs};
use error::CliError;
use output::Output;

/// ost - Static site compiler.
#[derive(Parser)]
#[command(name = "ost", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the site once.
    Build(BuildArgs),
    /// Build, rebuild on changes and serve the destination directory.
    Serve(ServeArgs),
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::Build(args) => args.site.verbose,
            Self::Serve(args) => args.site.verbose,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.command.verbose() {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Build(args) => args.execute(),
        Commands::Serve(args) => serve(args),
    };

    if let Err(err) = result {
        output.failed(&err);
        std::process::exit(1);
    }
}

fn serve(args: ServeArgs) -> Result<(), CliError> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(args.execute())
}
