//! Directory-backed market snapshot loader.
//!
//! Layout of a snapshot directory:
//!
//! ```text
//! snapshots/
//! ├── 202401010405.json   one MarketSnapshot per interval, named YYYYMMDDHHMM
//! ├── 202401010410.json
//! └── prices.json         optional list of recorded price series
//! ```
//!
//! Everything is read once when the loader is opened. Afterwards the loader is an
//! immutable cache that any number of cascades may share.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use nemsim_core::{
    InMemorySnapshotStore, MarketSnapshot, MarketSnapshotLoader, PriceKind, PriceSeries,
    ProcessKind, RegionId, SnapshotError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// File-name timestamp format of snapshot documents.
pub const SNAPSHOT_FILE_FORMAT: &str = "%Y%m%d%H%M";
pub const PRICES_FILE: &str = "prices.json";

/// One entry of `prices.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub kind: PriceKind,
    /// Start of the run (forecast kinds) or of the series (dispatch, trading)
    pub run_time: NaiveDateTime,
    pub region: RegionId,
    pub times: Vec<NaiveDateTime>,
    pub prices: Vec<f64>,
}

pub fn snapshot_file_name(timestamp: NaiveDateTime) -> String {
    format!("{}.json", timestamp.format(SNAPSHOT_FILE_FORMAT))
}

/// Write `snapshot` into `dir` under its canonical file name.
pub fn write_snapshot(dir: &Path, snapshot: &MarketSnapshot) -> Result<PathBuf> {
    let path = dir.join(snapshot_file_name(snapshot.timestamp));
    let json = serde_json::to_string_pretty(snapshot).context("serializing market snapshot")?;
    fs::write(&path, json).with_context(|| format!("writing snapshot {}", path.display()))?;
    Ok(path)
}

pub fn write_prices(dir: &Path, records: &[PriceRecord]) -> Result<PathBuf> {
    let path = dir.join(PRICES_FILE);
    let json = serde_json::to_string_pretty(records).context("serializing price records")?;
    fs::write(&path, json).with_context(|| format!("writing prices {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct DirectorySnapshotLoader {
    root: PathBuf,
    store: InMemorySnapshotStore,
}

impl DirectorySnapshotLoader {
    /// Read every snapshot and price document under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = fs::read_dir(&root)
            .with_context(|| format!("reading snapshot directory {}", root.display()))?;

        let mut store = InMemorySnapshotStore::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("listing {}", root.display()))?
                .path();
            let Some(stamp) = snapshot_stamp(&path) else {
                continue;
            };
            let snapshot = read_snapshot(&path)?;
            if snapshot.timestamp != stamp {
                bail!(
                    "snapshot {} is stamped {} but named for {}",
                    path.display(),
                    snapshot.timestamp,
                    stamp
                );
            }
            store.insert_snapshot(snapshot);
        }

        let prices_path = root.join(PRICES_FILE);
        let mut series = 0;
        if prices_path.exists() {
            for record in read_prices(&prices_path)? {
                store.insert_prices(
                    record.kind,
                    record.run_time,
                    record.region,
                    PriceSeries::new(record.times, record.prices),
                );
                series += 1;
            }
        }

        info!(
            dir = %root.display(),
            snapshots = store.len(),
            price_series = series,
            "loaded snapshot directory"
        );
        Ok(Self { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn snapshot_stamp(path: &Path) -> Option<NaiveDateTime> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 12 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stem, SNAPSHOT_FILE_FORMAT).ok()
}

fn read_snapshot(path: &Path) -> Result<MarketSnapshot> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot = serde_json::from_str(&text)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    debug!(path = %path.display(), "read snapshot");
    Ok(snapshot)
}

fn read_prices(path: &Path) -> Result<Vec<PriceRecord>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading prices {}", path.display()))?;
    let records: Vec<PriceRecord> =
        serde_json::from_str(&text).with_context(|| format!("parsing prices {}", path.display()))?;
    for record in &records {
        if record.times.len() != record.prices.len() {
            bail!(
                "{} {} prices for {} at {}: {} times but {} prices",
                path.display(),
                record.kind,
                record.region,
                record.run_time,
                record.times.len(),
                record.prices.len()
            );
        }
    }
    Ok(records)
}

impl MarketSnapshotLoader for DirectorySnapshotLoader {
    fn load_regions_and_interconnectors(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<MarketSnapshot, SnapshotError> {
        self.store.load_regions_and_interconnectors(timestamp)
    }

    fn load_predispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        process: ProcessKind,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.store.load_predispatch_prices(timestamp, process, region)
    }

    fn load_dispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.store.load_dispatch_prices(timestamp, region)
    }

    fn load_trading_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.store.load_trading_prices(timestamp, region)
    }
}
