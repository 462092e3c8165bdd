//! Fan-out of independent reconstruction windows over a Rayon worker pool.
//!
//! Each [`WindowTask`] owns its start time and seed state; the snapshot loader,
//! scheduler and run configuration are shared read-only through a [`WindowContext`].
//! Workers send their [`BatchWindowRecord`] back over a channel, results are written
//! per window under the output root and summarised in `batch_manifest.json`.

pub mod manifest;
pub mod runner;
pub mod window;

pub use manifest::{load_batch_manifest, write_batch_manifest, BatchManifest, BatchWindowRecord};
pub use runner::{run_batch, BatchRunnerConfig, BatchSummary};
pub use window::{run_window, RunVerdict, WindowContext, WindowReport, WindowTask};
