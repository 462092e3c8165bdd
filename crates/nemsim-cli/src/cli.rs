use chrono::NaiveDateTime;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use nemsim_algo::{FailurePolicy, LpSolverKind};
use nemsim_core::ProcessKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "nemsim",
    author,
    version,
    about = "Reconstruct NEM dispatch, P5MIN and predispatch runs from recorded snapshots",
    long_about = None
)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Solve one run of a process and compare it with the record
    Run(RunArgs),
    /// Print the interval timestamps a process would solve
    Plan {
        /// Run start, YYYY-MM-DDTHH:MM
        #[arg(long, value_parser = parse_start)]
        start: NaiveDateTime,
        /// dispatch, p5min or predispatch
        #[arg(long)]
        process: ProcessKind,
        /// CSV of predispatch interval counts by time of day
        #[arg(long, value_hint = ValueHint::FilePath)]
        interval_counts: Option<PathBuf>,
    },
    /// Run many independent windows in parallel
    Batch(BatchArgs),
    /// Reprint a finished batch from its manifest
    Report {
        /// Path to batch_manifest.json
        #[arg(value_hint = ValueHint::FilePath)]
        manifest: PathBuf,
    },
}

/// Settings shared by every subcommand that solves.
#[derive(Args, Debug, Clone)]
pub struct SolveArgs {
    /// TOML run configuration
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Override the configured failure policy (abort or hold-last-state)
    #[arg(long)]
    pub failure_policy: Option<FailurePolicy>,
    /// Override the configured LP backend
    #[arg(long)]
    pub solver: Option<LpSolverKind>,
    /// CSV of predispatch interval counts by time of day
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub interval_counts: Option<PathBuf>,
    /// Directory of recorded snapshots
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub snapshots: PathBuf,
    /// Output directory
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run start, YYYY-MM-DDTHH:MM
    #[arg(long, value_parser = parse_start)]
    pub start: NaiveDateTime,
    /// dispatch, p5min or predispatch
    #[arg(long)]
    pub process: ProcessKind,
    #[command(flatten)]
    pub solve: SolveArgs,
    /// Battery energy capacity in MWh, overriding the configuration
    #[arg(long)]
    pub battery_capacity: Option<f64>,
    /// Battery power rating in MW, overriding the configuration
    #[arg(long)]
    pub battery_power: Option<f64>,
    /// Run predispatch from the same start first and seed this run from its final state
    #[arg(long, default_value_t = false)]
    pub chain_from_predispatch: bool,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Comma-separated window starts, YYYY-MM-DDTHH:MM
    #[arg(long, value_delimiter = ',', required = true, value_parser = parse_start)]
    pub starts: Vec<NaiveDateTime>,
    /// dispatch, p5min or predispatch
    #[arg(long)]
    pub process: ProcessKind,
    #[command(flatten)]
    pub solve: SolveArgs,
    /// Worker threads (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,
    /// Seed every window from a predispatch run at the same start
    #[arg(long, default_value_t = false)]
    pub chain_from_predispatch: bool,
}

const START_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a run start in any of the accepted layouts.
pub fn parse_start(value: &str) -> Result<NaiveDateTime, String> {
    START_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value.trim(), format).ok())
        .ok_or_else(|| format!("invalid start '{value}', expected YYYY-MM-DDTHH:MM"))
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}
