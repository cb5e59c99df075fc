//! CLI definition.

use clap::{Parser, Subcommand};
use dg_core::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "device-grid",
    about = "Partition tagged scenario suites and rotate a device pool across parallel workers",
    version
)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Path to grid.toml
    #[arg(long, global = true, default_value = "grid.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse, filter, and materialize feature files into per-locale
    /// single-scenario buckets.
    Partition {
        /// Directory containing .feature files
        #[arg(long)]
        features: PathBuf,

        /// Output directory (defaults to run.out_dir from config)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Tag filter expression (overrides run.filter from config)
        #[arg(long)]
        filter: Option<String>,

        /// Worker count (overrides run.workers from config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Allocate the next device from the shared counter
    /// (pre-session hook entry point).
    Allocate {
        /// Counter namespace override, e.g. one per build variant
        #[arg(long)]
        pool: Option<String>,

        /// Also emit the assembled session capability for the
        /// allocated device.
        #[arg(long)]
        with_capability: bool,

        /// Locale tag applied to the capability, e.g. "@locale:de_DE".
        /// Repeatable; unset axes default from the configured profile.
        #[arg(long = "locale-tag")]
        locale_tags: Vec<String>,
    },

    /// Show the persisted counter state and recent allocations.
    Status {
        /// Counter namespace override
        #[arg(long)]
        pool: Option<String>,
    },
}
