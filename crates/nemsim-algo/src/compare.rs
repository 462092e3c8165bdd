//! Comparison of modeled against recorded outcomes.
//!
//! Divergence is never an error: every absolute difference strictly greater than the
//! tolerance becomes a [`ComparisonWarning`], logged and returned to the caller.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use nemsim_core::{
    InterconnectorId, MarketSnapshotLoader, ProcessKind, RegionId, MARKET_DATETIME_FORMAT,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cascade::{CascadeOutcome, IntervalRecord};
use crate::solution::IntervalSolution;

pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// The quantity a warning is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ComparisonSubject {
    TotalGeneration,
    InterconnectorFlow(InterconnectorId),
    InterconnectorLosses(InterconnectorId),
    RegionGeneration(RegionId),
    RegionLoad(RegionId),
}

impl fmt::Display for ComparisonSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonSubject::TotalGeneration => f.write_str("total generation"),
            ComparisonSubject::InterconnectorFlow(id) => write!(f, "{id} flow"),
            ComparisonSubject::InterconnectorLosses(id) => write!(f, "{id} losses"),
            ComparisonSubject::RegionGeneration(id) => write!(f, "{id} generation"),
            ComparisonSubject::RegionLoad(id) => write!(f, "{id} load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonWarning {
    pub process: ProcessKind,
    pub timestamp: NaiveDateTime,
    pub interval_index: usize,
    pub subject: ComparisonSubject,
    pub modeled: f64,
    pub recorded: f64,
}

impl ComparisonWarning {
    pub fn difference(&self) -> f64 {
        self.modeled - self.recorded
    }
}

impl fmt::Display for ComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} interval {} at {}: {} modeled {:.4} vs recorded {:.4}",
            self.process,
            self.interval_index,
            self.timestamp.format(MARKET_DATETIME_FORMAT),
            self.subject,
            self.modeled,
            self.recorded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultComparator {
    tolerance: f64,
}

impl Default for ResultComparator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ResultComparator {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn check(
        &self,
        out: &mut Vec<ComparisonWarning>,
        (process, timestamp, interval_index): (ProcessKind, NaiveDateTime, usize),
        subject: ComparisonSubject,
        modeled: f64,
        recorded: f64,
    ) {
        if (modeled - recorded).abs() > self.tolerance {
            out.push(ComparisonWarning {
                process,
                timestamp,
                interval_index,
                subject,
                modeled,
                recorded,
            });
        }
    }

    /// Compare one interval against the snapshot it was formulated from.
    pub fn compare_interval(
        &self,
        process: ProcessKind,
        record: &IntervalRecord,
    ) -> Vec<ComparisonWarning> {
        let mut warnings = Vec::new();
        let Some(solution) = &record.solution else {
            return warnings;
        };
        let at = (process, record.timestamp, record.index);
        let snapshot = &record.snapshot;

        let recorded_total: f64 = snapshot.regions.iter().map(|r| r.recorded_generation_mw).sum();
        self.check(
            &mut warnings,
            at,
            ComparisonSubject::TotalGeneration,
            solution.total_generation_mw(),
            recorded_total,
        );
        for ic in &snapshot.interconnectors {
            let Some(modeled) = solution.interconnector(&ic.id) else {
                continue;
            };
            self.check(
                &mut warnings,
                at,
                ComparisonSubject::InterconnectorFlow(ic.id.clone()),
                modeled.flow_mw,
                ic.recorded_flow_mw,
            );
            self.check(
                &mut warnings,
                at,
                ComparisonSubject::InterconnectorLosses(ic.id.clone()),
                modeled.losses_mw,
                ic.recorded_losses_mw,
            );
        }
        for region in &snapshot.regions {
            let Some(modeled) = solution.region(&region.id) else {
                continue;
            };
            self.check(
                &mut warnings,
                at,
                ComparisonSubject::RegionGeneration(region.id.clone()),
                modeled.generation_mw,
                region.recorded_generation_mw,
            );
            self.check(
                &mut warnings,
                at,
                ComparisonSubject::RegionLoad(region.id.clone()),
                modeled.load_mw,
                region.recorded_load_mw,
            );
        }
        warnings
    }

    /// Compare every interval of a finished cascade, logging each warning.
    pub fn compare_outcome(&self, outcome: &CascadeOutcome) -> Vec<ComparisonWarning> {
        let warnings: Vec<_> = outcome
            .records()
            .iter()
            .flat_map(|record| self.compare_interval(outcome.process(), record))
            .collect();
        for warning in &warnings {
            warn!(%warning, "modeled outcome diverges from record");
        }
        warnings
    }

    /// Compare the total dispatch of two modeled runs of the same interval.
    pub fn compare_solutions(
        &self,
        process: ProcessKind,
        interval_index: usize,
        modeled: &IntervalSolution,
        reference: &IntervalSolution,
    ) -> Option<ComparisonWarning> {
        let mut warnings = Vec::new();
        self.check(
            &mut warnings,
            (process, modeled.timestamp, interval_index),
            ComparisonSubject::TotalGeneration,
            modeled.total_generation_mw(),
            reference.total_generation_mw(),
        );
        warnings.pop()
    }
}

/// Recorded regional prices for the intervals of one run.
///
/// Dispatch runs use recorded dispatch prices; forecast runs use the prices the run
/// itself published, then (predispatch only) trading prices, then the snapshot price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedPrices {
    prices: BTreeMap<(NaiveDateTime, RegionId), f64>,
}

impl RecordedPrices {
    pub fn collect(loader: &dyn MarketSnapshotLoader, outcome: &CascadeOutcome) -> Self {
        let mut prices = BTreeMap::new();
        let process = outcome.process();
        let Some(run_start) = outcome.plan().first() else {
            return Self { prices };
        };
        let regions: Vec<RegionId> = outcome
            .records()
            .iter()
            .flat_map(|r| r.snapshot.regions.iter().map(|region| region.id.clone()))
            .collect();

        let mut series = BTreeMap::new();
        for region in regions {
            if series.contains_key(&region) {
                continue;
            }
            let loaded = match process {
                ProcessKind::Dispatch => loader.load_dispatch_prices(run_start, &region),
                ProcessKind::P5Min => loader.load_predispatch_prices(run_start, process, &region),
                ProcessKind::Predispatch => loader
                    .load_predispatch_prices(run_start, process, &region)
                    .or_else(|_| loader.load_trading_prices(run_start, &region)),
            };
            match loaded {
                Ok(s) => {
                    series.insert(region, Some(s));
                }
                Err(err) => {
                    debug!(region = %region, error = %err, "falling back to snapshot prices");
                    series.insert(region, None);
                }
            }
        }

        for record in outcome.records() {
            for region in &record.snapshot.regions {
                let price = series
                    .get(&region.id)
                    .and_then(|s| s.as_ref())
                    .and_then(|s| s.price_at(record.timestamp))
                    .unwrap_or(region.recorded_price);
                prices.insert((record.timestamp, region.id.clone()), price);
            }
        }
        Self { prices }
    }

    pub fn get(&self, timestamp: NaiveDateTime, region: &RegionId) -> Option<f64> {
        self.prices.get(&(timestamp, region.clone())).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::RegionResult;

    fn solution(generation: &[f64]) -> IntervalSolution {
        IntervalSolution {
            timestamp: "2024-01-01T04:05:00".parse().unwrap(),
            objective: 0.0,
            regions: generation
                .iter()
                .enumerate()
                .map(|(i, g)| RegionResult {
                    id: RegionId::new(format!("R{i}")),
                    demand_mw: *g,
                    generation_mw: *g,
                    load_mw: 0.0,
                    net_interchange_mw: 0.0,
                    storage_mw: 0.0,
                    deficit_mw: 0.0,
                    surplus_mw: 0.0,
                    price: 0.0,
                })
                .collect(),
            interconnectors: vec![],
            battery: None,
        }
    }

    #[test]
    fn difference_beyond_tolerance_is_flagged() {
        let comparator = ResultComparator::default();
        let warning = comparator
            .compare_solutions(
                ProcessKind::Dispatch,
                0,
                &solution(&[100.0, 50.002]),
                &solution(&[100.0, 50.0]),
            )
            .unwrap();
        assert_eq!(warning.subject, ComparisonSubject::TotalGeneration);
        assert!((warning.difference() - 0.002).abs() < 1e-9);
    }

    #[test]
    fn difference_within_tolerance_is_not_flagged() {
        let comparator = ResultComparator::default();
        assert!(comparator
            .compare_solutions(
                ProcessKind::Dispatch,
                0,
                &solution(&[100.0, 50.0005]),
                &solution(&[100.0, 50.0]),
            )
            .is_none());
    }

    #[test]
    fn warning_renders_context() {
        let warning = ComparisonWarning {
            process: ProcessKind::P5Min,
            timestamp: "2024-01-01T04:05:00".parse().unwrap(),
            interval_index: 2,
            subject: ComparisonSubject::InterconnectorFlow(InterconnectorId::new("V-SA")),
            modeled: 120.0,
            recorded: 100.0,
        };
        assert_eq!(
            warning.to_string(),
            "p5min interval 2 at 2024/01/01 04:05:00: V-SA flow modeled 120.0000 vs recorded 100.0000"
        );
    }
}
