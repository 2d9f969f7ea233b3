// Copyright 2026 Taxprobe Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use taxprobe::cli;
use taxprobe::cli::run_cmd::RunArgs;

#[derive(Parser)]
#[command(
    name = "taxprobe",
    about = "Taxprobe — property-tax extraction engine for county portals",
    version,
    after_help = "Run 'taxprobe <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract tax data for a batch of properties
    Run {
        /// Property records file (JSON array or JSONL)
        input: PathBuf,
        /// Results file, one JSON result per line
        #[arg(long, short, default_value = "results.jsonl")]
        output: PathBuf,
        /// Also write a run summary JSON to this path
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Only process records whose jurisdiction matches
        #[arg(long)]
        jurisdiction: Option<String>,
        /// Maximum tasks in flight at once
        #[arg(long, default_value = "3")]
        concurrency: usize,
        /// Minimum milliseconds between hits to the same site domain
        #[arg(long, default_value = "2000")]
        domain_interval_ms: u64,
        /// Load strategies from this JSON file instead of the built-in set
        #[arg(long)]
        strategies: Option<PathBuf>,
        /// Resolve strategies without touching any site
        #[arg(long)]
        dry_run: bool,
        /// Cap on the number of tasks taken from the input
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List registered jurisdiction strategies
    Strategies {
        /// Strategy JSON file (defaults to the built-in set)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "taxprobe=debug" } else { "taxprobe=info" };
    let filter = EnvFilter::try_from_env("TAXPROBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("TAXPROBE_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("TAXPROBE_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("TAXPROBE_VERBOSE", "1");
    }
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            summary,
            jurisdiction,
            concurrency,
            domain_interval_ms,
            strategies,
            dry_run,
            limit,
        } => {
            cli::run_cmd::run(RunArgs {
                input,
                output,
                summary,
                jurisdiction,
                concurrency,
                domain_interval_ms,
                strategies,
                dry_run,
                limit,
            })
            .await
        }
        Commands::Strategies { file } => cli::strategies_cmd::run(file.as_deref()),
        Commands::Doctor => cli::doctor::run().await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "taxprobe", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}
