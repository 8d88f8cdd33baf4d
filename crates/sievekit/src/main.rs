//! Command-line front end for the Sieve parser.
//!
//! `sievekit parse <files...>` checks each script and reports `Syntax OK`
//! or the first error with its line number. `--dump` prints the parsed
//! tree, `--to-sieve` the canonical re-serialization.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sievekit_script::Registry;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check Sieve scripts for syntactic validity.
    Parse {
        /// Files to parse.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the parsed command tree.
        #[arg(long)]
        dump: bool,

        /// Print the canonical serialization.
        #[arg(long)]
        to_sieve: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Parse {
            files,
            dump,
            to_sieve,
        } => run_parse(&files, dump, to_sieve),
    }
}

fn run_parse(files: &[PathBuf], dump: bool, to_sieve: bool) -> ExitCode {
    let registry = Registry::default();
    let parser = sievekit_script::Parser::new(&registry);
    let prefix_paths = files.len() > 1;
    let mut failed = false;

    for path in files {
        let prefix = if prefix_paths {
            format!("{}: ", path.display())
        } else {
            String::new()
        };
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                failed = true;
                continue;
            }
        };
        match parser.parse(&source) {
            Ok(script) => {
                println!("{prefix}Syntax OK");
                if dump {
                    print!("{}", script.dump());
                }
                if to_sieve {
                    print!("{}", script.to_sieve());
                }
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "parse failed");
                println!("{prefix}{err}");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
