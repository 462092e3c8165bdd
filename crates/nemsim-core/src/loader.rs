//! Interface to recorded market data.
//!
//! Acquisition and parsing of the market operator's raw files happen elsewhere; the
//! reconstruction only consumes recorded ground truth keyed by timestamp and region
//! or interconnector identifier through [`MarketSnapshotLoader`].

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MarketSnapshot, ProcessKind, RegionId};

/// Errors raised by snapshot loaders
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("no market snapshot recorded for {0}")]
    Missing(NaiveDateTime),
    #[error("no {kind} prices recorded for region {region} at {timestamp}")]
    MissingPrices {
        kind: String,
        region: RegionId,
        timestamp: NaiveDateTime,
    },
    #[error("snapshot source error: {0}")]
    Source(String),
}

/// Recorded price trajectory for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub times: Vec<NaiveDateTime>,
    pub prices: Vec<f64>,
}

impl PriceSeries {
    pub fn new(times: Vec<NaiveDateTime>, prices: Vec<f64>) -> Self {
        Self { times, prices }
    }

    pub fn len(&self) -> usize {
        self.times.len().min(self.prices.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn price_at(&self, time: NaiveDateTime) -> Option<f64> {
        self.times
            .iter()
            .position(|t| *t == time)
            .and_then(|i| self.prices.get(i).copied())
    }
}

/// Source of recorded market outcomes.
///
/// Implementations must be safe for concurrent reads: batch workers share one loader.
pub trait MarketSnapshotLoader: Send + Sync {
    /// Regions, interconnectors and the recorded objective for one interval.
    fn load_regions_and_interconnectors(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<MarketSnapshot, SnapshotError>;

    /// Forecast prices published by a P5MIN or PREDISPATCH run starting at `timestamp`.
    fn load_predispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        process: ProcessKind,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError>;

    /// Recorded 5-minute dispatch prices from `timestamp` onwards.
    fn load_dispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError>;

    /// Recorded 30-minute trading prices from `timestamp` onwards.
    fn load_trading_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError>;
}

/// Which recorded price trajectory a [`PriceSeries`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceKind {
    Dispatch,
    Trading,
    P5Min,
    Predispatch,
}

impl PriceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceKind::Dispatch => "dispatch",
            PriceKind::Trading => "trading",
            PriceKind::P5Min => "p5min",
            PriceKind::Predispatch => "predispatch",
        }
    }

    /// Forecast price kind published by a process run.
    pub fn forecast(process: ProcessKind) -> Self {
        match process {
            ProcessKind::Dispatch => PriceKind::Dispatch,
            ProcessKind::P5Min => PriceKind::P5Min,
            ProcessKind::Predispatch => PriceKind::Predispatch,
        }
    }
}

impl fmt::Display for PriceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loader backed by snapshots held in memory.
///
/// Populated up front and read-only afterwards, so one store can be shared by any
/// number of cascades.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: HashMap<NaiveDateTime, MarketSnapshot>,
    prices: HashMap<(PriceKind, NaiveDateTime, RegionId), PriceSeries>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_snapshot(&mut self, snapshot: MarketSnapshot) {
        self.snapshots.insert(snapshot.timestamp, snapshot);
    }

    pub fn with_snapshot(mut self, snapshot: MarketSnapshot) -> Self {
        self.insert_snapshot(snapshot);
        self
    }

    pub fn insert_prices(
        &mut self,
        kind: PriceKind,
        timestamp: NaiveDateTime,
        region: RegionId,
        series: PriceSeries,
    ) {
        self.prices.insert((kind, timestamp, region), series);
    }

    pub fn with_prices(
        mut self,
        kind: PriceKind,
        timestamp: NaiveDateTime,
        region: RegionId,
        series: PriceSeries,
    ) -> Self {
        self.insert_prices(kind, timestamp, region, series);
        self
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn prices(
        &self,
        kind: PriceKind,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.prices
            .get(&(kind, timestamp, region.clone()))
            .cloned()
            .ok_or_else(|| SnapshotError::MissingPrices {
                kind: kind.to_string(),
                region: region.clone(),
                timestamp,
            })
    }
}

impl MarketSnapshotLoader for InMemorySnapshotStore {
    fn load_regions_and_interconnectors(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<MarketSnapshot, SnapshotError> {
        self.snapshots
            .get(&timestamp)
            .cloned()
            .ok_or(SnapshotError::Missing(timestamp))
    }

    fn load_predispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        process: ProcessKind,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.prices(PriceKind::forecast(process), timestamp, region)
    }

    fn load_dispatch_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.prices(PriceKind::Dispatch, timestamp, region)
    }

    fn load_trading_prices(
        &self,
        timestamp: NaiveDateTime,
        region: &RegionId,
    ) -> Result<PriceSeries, SnapshotError> {
        self.prices(PriceKind::Trading, timestamp, region)
    }
}
