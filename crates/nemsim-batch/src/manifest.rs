//! `batch_manifest.json`: one record per window of a batch run.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::window::RunVerdict;

/// Outcome of one window as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWindowRecord {
    pub window_id: String,
    pub process: String,
    pub start: String,
    pub status: RunVerdict,
    pub intervals: usize,
    pub solved: usize,
    pub failures: usize,
    pub warnings: usize,
    pub error: Option<String>,
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchManifest {
    pub created_at: DateTime<Utc>,
    pub process: String,
    pub num_windows: usize,
    pub success: usize,
    pub failure: usize,
    pub windows: Vec<BatchWindowRecord>,
}

impl BatchManifest {
    /// Worst verdict over all windows.
    pub fn verdict(&self) -> RunVerdict {
        self.windows
            .iter()
            .map(|w| w.status)
            .max()
            .unwrap_or(RunVerdict::Clean)
    }

    fn check_counts(&self) -> Result<()> {
        let failed = self
            .windows
            .iter()
            .filter(|w| w.status > RunVerdict::Discrepancy)
            .count();
        if self.num_windows != self.windows.len()
            || self.success + self.failure != self.num_windows
            || self.failure != failed
        {
            bail!(
                "manifest counts ({} windows, {} succeeded, {} failed) disagree with its {} records",
                self.num_windows,
                self.success,
                self.failure,
                self.windows.len()
            );
        }
        Ok(())
    }
}

/// Stage the manifest beside `path` and rename it into place, so a reader never
/// sees a half-written file.
pub fn write_batch_manifest(path: &Path, manifest: &BatchManifest) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let staging = path.with_extension("json.partial");
    let file = fs::File::create(&staging)
        .with_context(|| format!("creating '{}'", staging.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest)
        .context("serializing batch manifest to JSON")?;
    writer
        .flush()
        .with_context(|| format!("flushing '{}'", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("moving batch manifest into '{}'", path.display()))?;
    Ok(())
}

/// Read a manifest back, rejecting one whose counters do not match its records.
pub fn load_batch_manifest(path: &Path) -> Result<BatchManifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading batch manifest '{}'", path.display()))?;
    let manifest: BatchManifest = serde_json::from_str(&text)
        .with_context(|| format!("parsing batch manifest '{}'", path.display()))?;
    manifest
        .check_counts()
        .with_context(|| format!("checking batch manifest '{}'", path.display()))?;
    Ok(manifest)
}
