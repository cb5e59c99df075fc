use anyhow::Result;
use clap::Parser;

mod allocate_cmd;
mod cli;
mod partition_cmd;
mod status_cmd;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing (output to stderr, initialize only once)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let format = cli.format.clone();

    match cli.command {
        Commands::Partition {
            features,
            out,
            filter,
            workers,
        } => partition_cmd::run(&cli.config, &features, out, filter, workers, &format),
        Commands::Allocate {
            pool,
            with_capability,
            locale_tags,
        } => allocate_cmd::run(&cli.config, pool, with_capability, &locale_tags, &format),
        Commands::Status { pool } => status_cmd::run(&cli.config, pool, &format),
    }
}
