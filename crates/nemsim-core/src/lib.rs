//! # nemsim-core: Market Data Model for Dispatch Reconstruction
//!
//! Provides the plain data types shared by every stage of the cascading dispatch
//! reconstruction: market snapshots, battery state, the process-kind tag and the
//! error taxonomy.
//!
//! ## Design Philosophy
//!
//! Snapshots are **owned values**. Each interval of a cascade receives its own
//! [`MarketSnapshot`] and a [`CarriedState`] by value, so nothing solved in one
//! interval can alias solver state of another. Shared resources such as the
//! [`IntervalCountTable`] are immutable once constructed and are handed around
//! behind an `Arc`.
//!
//! ## Quick Start
//!
//! ```rust
//! use nemsim_core::*;
//!
//! let region = RegionSnapshot::new("NSW1", 7_500.0)
//!     .with_offer(Offer::new(35.0, 8_000.0));
//! let snapshot = MarketSnapshot::new(
//!     "2024-01-01T04:05:00".parse().unwrap(),
//!     vec![region],
//!     vec![],
//! );
//! assert_eq!(snapshot.regions.len(), 1);
//! assert_eq!(ProcessKind::Predispatch.step_minutes(), 30);
//! ```
//!
//! ## Modules
//!
//! - [`market`] - Region and interconnector snapshots, offers, loss models
//! - [`battery`] - Battery state-of-charge chain and the state carried between intervals
//! - [`process`] - The closed set of market processes
//! - [`interval_counts`] - Time-of-day to predispatch period count lookup
//! - [`loader`] - The market snapshot loader interface
//! - [`error`] - Error taxonomy shared by planning, formulation and solving

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod battery;
pub mod error;
pub mod interval_counts;
pub mod loader;
pub mod market;
pub mod process;

pub use battery::{BatteryError, BatteryState, CarriedState};
pub use error::{
    CurveConstructionError, DispatchError, DispatchResult, FormulationError, IntervalContext,
    PlanningError, SolveFailure,
};
pub use interval_counts::IntervalCountTable;
pub use loader::{
    InMemorySnapshotStore, MarketSnapshotLoader, PriceKind, PriceSeries, SnapshotError,
};
pub use market::{
    InterconnectorSnapshot, LossModel, MarketSnapshot, Offer, RegionDemands, RegionSnapshot,
};
pub use process::ProcessKind;

/// Format used by the market operator for interval timestamps in flat files.
pub const MARKET_DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterconnectorId(String);

impl RegionId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        RegionId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl InterconnectorId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        InterconnectorId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for InterconnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        RegionId::new(value)
    }
}

impl From<&str> for InterconnectorId {
    fn from(value: &str) -> Self {
        InterconnectorId::new(value)
    }
}
