//! CLI argument definitions for qr.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Start history backfill and daily capture for every exchange |
//! | `crawl` | One-shot crawl of a date range, with retry, then save |
//! | `exists` | Report whether a record is stored (exit 0 when present, 1 otherwise) |
//! | `inspect` | Print a JSON summary of a stored record with per-serial rollups |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `qr.toml` | Configuration file |
//! | `--log-level` | `info` | Log filter used when `RUST_LOG` is unset |
//! | `--log-json` | `false` | Emit logs as JSON lines |
//!
//! # Examples
//!
//! ```bash
//! # Run the daemon with the exchanges from qr.toml
//! qr run
//!
//! # Backfill Hong Kong from a fixed date
//! qr run --exchanges Hkex --start 2024-01-02
//!
//! # Re-crawl one week of Nasdaq
//! qr crawl --exchange Nasdaq --date 2024-03-11 --to 2024-03-15
//!
//! # Look at a stored day
//! qr inspect --exchange Nasdaq --date 2024-03-15 --company AAPL
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// qr - intraday quote recorder
///
/// Captures one record per exchange per local calendar day from the Yahoo
/// chart API and keeps the stored history gap-free.
#[derive(Debug, Parser)]
#[command(
    name = "qr",
    author,
    version,
    about = "Intraday quote recorder",
    long_about = "qr records every company's intraday bars once per exchange per local day.\n\
\n\
  • History backfill from a start date through yesterday\n\
  • Daily capture after each local midnight with whole-batch retry\n\
  • Memory, compressed filesystem, and DuckDB stores with write verification\n\
\n\
Use 'qr <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true, default_value = "qr.toml")]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is not set (e.g. "info", "qr_core=debug").
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start history and daily jobs; runs until Ctrl-C or a history failure.
    Run(RunArgs),

    /// Crawl and save a date range once.
    Crawl(CrawlArgs),

    /// Check whether a record is stored.
    ///
    /// Exits 0 when the record exists and 1 when it does not.
    Exists(ExistsArgs),

    /// Print a stored record as JSON.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Comma-separated exchange codes, overriding the configuration.
    #[arg(long)]
    pub exchanges: Option<String>,

    /// First date to backfill (YYYY-MM-DD or YYYYMMDD), overriding the configuration.
    #[arg(long)]
    pub start: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CrawlArgs {
    /// Exchange code (e.g. Nasdaq, Hkex).
    #[arg(long)]
    pub exchange: String,

    /// First date to crawl.
    #[arg(long)]
    pub date: String,

    /// Last date to crawl, inclusive. Defaults to --date.
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ExistsArgs {
    #[arg(long)]
    pub exchange: String,

    #[arg(long)]
    pub date: String,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    #[arg(long)]
    pub exchange: String,

    #[arg(long)]
    pub date: String,

    /// Only show this company's day.
    #[arg(long)]
    pub company: Option<String>,
}
