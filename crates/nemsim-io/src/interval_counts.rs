//! CSV form of the predispatch interval-count table.
//!
//! ```text
//! time,periods
//! 00:00,8
//! 00:01,8
//! ...
//! ```
//!
//! Every minute of the day must be present; a gap would surface as a planning error
//! in the middle of a batch otherwise.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use nemsim_core::IntervalCountTable;
use serde::{Deserialize, Serialize};

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Serialize, Deserialize)]
struct CountRow {
    time: String,
    periods: u32,
}

pub fn load_interval_counts(path: &Path) -> Result<IntervalCountTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening interval counts {}", path.display()))?;
    let mut entries = Vec::new();
    for (line, row) in reader.deserialize::<CountRow>().enumerate() {
        let row = row.with_context(|| format!("{} row {}", path.display(), line + 1))?;
        let time = NaiveTime::parse_from_str(row.time.trim(), TIME_FORMAT).with_context(|| {
            format!("{} row {}: bad time '{}'", path.display(), line + 1, row.time)
        })?;
        entries.push((time, row.periods));
    }
    IntervalCountTable::from_entries(entries)
        .require_complete()
        .with_context(|| format!("interval counts {}", path.display()))
}

pub fn write_interval_counts(path: &Path, table: &IntervalCountTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating interval counts {}", path.display()))?;
    for (time, periods) in table.iter() {
        writer
            .serialize(CountRow {
                time: time.format(TIME_FORMAT).to_string(),
                periods,
            })
            .context("writing interval count row")?;
    }
    writer.flush().context("flushing interval counts")?;
    Ok(())
}
