//! CSV export of a finished cascade next to the recorded outcomes.
//!
//! Three files are written per run:
//!
//! | File | One row per |
//! |------|-------------|
//! | `objective.csv` | interval |
//! | `interconnectors.csv` | interval × interconnector |
//! | `regions.csv` | interval × region |
//!
//! Intervals without a solution (an aborted interval, or a held interval with nothing
//! to hold) still get an objective row, with the modeled columns left empty.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nemsim_algo::{CascadeOutcome, RecordedPrices};
use nemsim_core::MARKET_DATETIME_FORMAT;
use serde::Serialize;
use tracing::info;

pub const OBJECTIVE_FILE: &str = "objective.csv";
pub const INTERCONNECTORS_FILE: &str = "interconnectors.csv";
pub const REGIONS_FILE: &str = "regions.csv";

const OBJECTIVE_HEADER: &[&str] = &[
    "interval_datetime",
    "process",
    "interval_index",
    "status",
    "objective",
    "recorded_objective",
];
const INTERCONNECTORS_HEADER: &[&str] = &[
    "interval_datetime",
    "interconnector_id",
    "flow",
    "recorded_flow",
    "losses",
    "recorded_losses",
];
const REGIONS_HEADER: &[&str] = &[
    "interval_datetime",
    "region_id",
    "net_interchange",
    "recorded_net_interchange",
    "generation",
    "recorded_generation",
    "load",
    "recorded_load",
    "price",
    "recorded_price",
];

#[derive(Debug, Serialize)]
struct ObjectiveRow<'a> {
    interval_datetime: String,
    process: &'a str,
    interval_index: usize,
    status: &'a str,
    objective: Option<f64>,
    recorded_objective: f64,
}

#[derive(Debug, Serialize)]
struct InterconnectorRow<'a> {
    interval_datetime: String,
    interconnector_id: &'a str,
    flow: f64,
    recorded_flow: f64,
    losses: f64,
    recorded_losses: f64,
}

#[derive(Debug, Serialize)]
struct RegionRow<'a> {
    interval_datetime: String,
    region_id: &'a str,
    net_interchange: f64,
    recorded_net_interchange: f64,
    generation: f64,
    recorded_generation: f64,
    load: f64,
    recorded_load: f64,
    price: f64,
    recorded_price: f64,
}

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub objective: PathBuf,
    pub interconnectors: PathBuf,
    pub regions: PathBuf,
}

pub fn write_outcome(
    out_dir: &Path,
    outcome: &CascadeOutcome,
    prices: &RecordedPrices,
) -> Result<ExportPaths> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    let paths = ExportPaths {
        objective: out_dir.join(OBJECTIVE_FILE),
        interconnectors: out_dir.join(INTERCONNECTORS_FILE),
        regions: out_dir.join(REGIONS_FILE),
    };

    let mut objective = writer(&paths.objective, OBJECTIVE_HEADER)?;
    let mut interconnectors = writer(&paths.interconnectors, INTERCONNECTORS_HEADER)?;
    let mut regions = writer(&paths.regions, REGIONS_HEADER)?;
    let process = outcome.process();

    for record in outcome.records() {
        let stamp = record.timestamp.format(MARKET_DATETIME_FORMAT).to_string();
        let snapshot = &record.snapshot;
        objective
            .serialize(ObjectiveRow {
                interval_datetime: stamp.clone(),
                process: process.as_str(),
                interval_index: record.index,
                status: record.status.as_str(),
                objective: record.solution.as_ref().map(|s| s.objective),
                recorded_objective: snapshot.recorded_objective,
            })
            .context("writing objective row")?;

        let Some(solution) = &record.solution else {
            continue;
        };
        for ic in &snapshot.interconnectors {
            let Some(modeled) = solution.interconnector(&ic.id) else {
                continue;
            };
            interconnectors
                .serialize(InterconnectorRow {
                    interval_datetime: stamp.clone(),
                    interconnector_id: ic.id.as_str(),
                    flow: modeled.flow_mw,
                    recorded_flow: ic.recorded_flow_mw,
                    losses: modeled.losses_mw,
                    recorded_losses: ic.recorded_losses_mw,
                })
                .context("writing interconnector row")?;
        }
        for region in &snapshot.regions {
            let Some(modeled) = solution.region(&region.id) else {
                continue;
            };
            regions
                .serialize(RegionRow {
                    interval_datetime: stamp.clone(),
                    region_id: region.id.as_str(),
                    net_interchange: modeled.net_interchange_mw,
                    recorded_net_interchange: region.recorded_net_interchange_mw,
                    generation: modeled.generation_mw,
                    recorded_generation: region.recorded_generation_mw,
                    load: modeled.load_mw,
                    recorded_load: region.recorded_load_mw,
                    price: modeled.price,
                    recorded_price: prices
                        .get(record.timestamp, &region.id)
                        .unwrap_or(region.recorded_price),
                })
                .context("writing region row")?;
        }
    }

    for (w, path) in [
        (&mut objective, &paths.objective),
        (&mut interconnectors, &paths.interconnectors),
        (&mut regions, &paths.regions),
    ] {
        w.flush()
            .with_context(|| format!("flushing {}", path.display()))?;
    }
    info!(dir = %out_dir.display(), intervals = outcome.records().len(), "wrote results");
    Ok(paths)
}

/// CSV writer with `header` already written, whether or not any row follows.
fn writer(path: &Path, header: &[&str]) -> Result<csv::Writer<fs::File>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("writing header of {}", path.display()))?;
    Ok(writer)
}
