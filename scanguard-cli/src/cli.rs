//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O happen in this module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Scanguard -- product scan verification and counterfeit detection.
///
/// Use `scanguard <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "scanguard", version, about, long_about = None)]
pub struct Cli {
    /// Path to the scanguard.toml configuration file.
    #[arg(short, long, default_value = "scanguard.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a scan of a product code and run counterfeit detection.
    Scan(ScanArgs),

    /// Look up a product without recording a scan.
    Verify(VerifyArgs),

    /// List counterfeit reports for a manufacturer.
    Reports(ReportsArgs),

    /// Seed products and manufacturers from a JSON file.
    Import(ImportArgs),

    /// Resubmit incidents whose ledger submission is not confirmed.
    Reconcile(ReconcileArgs),

    /// Compare local incidents with their ledger records.
    Audit(AuditArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- scan ----

/// Record a scan event.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Product code printed on the package.
    pub code: String,

    /// Free-form scan location, stored verbatim.
    #[arg(short, long)]
    pub location: String,

    /// Scanning user id (anonymous when omitted).
    #[arg(short, long)]
    pub actor: Option<String>,

    /// Wait for ledger submission of a newly raised incident.
    ///
    /// Without this flag the incident stays pending until `scanguard reconcile`.
    #[arg(short, long)]
    pub wait: bool,
}

// ---- verify ----

/// Read-only product lookup.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Product code.
    pub code: String,
}

// ---- reports ----

/// Manufacturer report listing.
#[derive(Args, Debug)]
pub struct ReportsArgs {
    /// Manufacturer id.
    pub manufacturer: String,
}

// ---- import ----

/// Seed data import.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file with `products` and `manufacturers` arrays.
    pub file: PathBuf,
}

// ---- reconcile ----

/// Ledger reconciliation.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Also resubmit incidents the ledger rejected.
    #[arg(long)]
    pub include_rejected: bool,
}

// ---- audit ----

/// Ledger audit.
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Product code.
    pub code: String,

    /// Audit a single incident instead of every incident of the product.
    #[arg(long)]
    pub incident: Option<String>,
}

// ---- config ----

/// Manage scanguard configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, detection, ledger).
        #[arg(long)]
        section: Option<String>,
    },
}
