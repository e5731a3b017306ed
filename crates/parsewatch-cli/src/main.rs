use clap::Parser;

mod cli;
mod commands;
mod report;

use cli::{Cli, Commands};

/// Exit status when a run cannot be evaluated at all (same as rollback).
const FATAL_EXIT: i32 = 2;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            FATAL_EXIT
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    match &cli.command {
        Commands::Run(args) => commands::run(args).await,
        Commands::Aggregate(args) => commands::aggregate(args),
        Commands::CompareCanary(args) => commands::compare_canary(args),
        Commands::Policy(args) => commands::policy(args),
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("PARSEWATCH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
