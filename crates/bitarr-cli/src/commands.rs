use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "bitarr")]
#[command(about = "Detect bitrot, modification and missing files by checksum history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan one or more directory trees and classify every file
    Scan(ScanArgs),
    /// List supported checksum algorithms
    Algorithms,
    /// Refresh and list known storage devices
    Devices,
    /// List past scans, newest first
    Scans {
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a scan's summary and errors
    Show {
        scan_id: i64,
        /// Maximum number of errors to print
        #[arg(long, default_value_t = 50)]
        errors: i64,
    },
    /// Show the checksum history of one file
    History { path: PathBuf },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan. Nested roots are collapsed into their parent.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    #[arg(long)]
    pub name: Option<String>,
    /// Overrides `checksum_algorithm` from the configuration
    #[arg(long)]
    pub algorithm: Option<String>,
    /// Worker threads per scan (1-32)
    #[arg(long)]
    pub threads: Option<usize>,
    /// Directory name to skip; repeatable. Replaces the configured list.
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
    /// File glob to skip; repeatable. Replaces the configured list.
    #[arg(long = "exclude-pattern")]
    pub exclude_pattern: Vec<String>,
    /// Skip the counting pass; progress then has no total
    #[arg(long)]
    pub no_count: bool,
    /// Stop every scan after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}
