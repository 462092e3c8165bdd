//! # nemsim-io: Snapshot Loading, Run Configuration and Export
//!
//! File-system side of dispatch reconstruction. Everything here is read once at
//! process start (snapshots, interval counts, configuration) or written once at the
//! end of a run (CSV results).
//!
//! ## Modules
//!
//! - [`snapshots`] - [`DirectorySnapshotLoader`] over `YYYYMMDDHHMM.json` documents
//! - [`interval_counts`] - `time,periods` CSV form of the predispatch count table
//! - [`config`] - [`RunConfig`] TOML file
//! - [`export`] - `objective.csv`, `interconnectors.csv` and `regions.csv`
//!
//! ## Error Handling
//!
//! Configuration problems are reported as [`ConfigError`] so callers can tell them
//! apart; file access goes through `anyhow` with the offending path in the context.

pub mod config;
pub mod export;
pub mod interval_counts;
pub mod snapshots;

pub use config::{BatteryConfig, ConfigError, RunConfig, RunSection, SolverSection};
pub use export::{write_outcome, ExportPaths};
pub use interval_counts::{load_interval_counts, write_interval_counts};
pub use snapshots::{
    snapshot_file_name, write_prices, write_snapshot, DirectorySnapshotLoader, PriceRecord,
};
