//! Error taxonomy for dispatch reconstruction.
//!
//! Each stage has its own error family so callers can tell a planning problem from
//! a bad calibration fit or an infeasible interval. [`DispatchError`] wraps the
//! per-interval families with an [`IntervalContext`] holding everything needed to
//! reproduce the failing interval in isolation.
//!
//! Divergence between computed and recorded outcomes is not an error; see the
//! comparator in `nemsim-algo`.

use std::fmt;

use chrono::{NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::loader::SnapshotError;
use crate::{InterconnectorId, ProcessKind, RegionId, MARKET_DATETIME_FORMAT};

/// The interval plan could not be built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("no predispatch interval count for time of day {0}")]
    MissingIntervalCount(NaiveTime),

    #[error("predispatch interval count for time of day {0} is zero")]
    EmptyIntervalCount(NaiveTime),

    #[error("interval count table covers {covered} of 1440 minutes of the trading day")]
    IncompleteTable { covered: usize },

    #[error(
        "{process} horizon ending {target_end} is unreachable from {first} with {step_minutes}-minute steps"
    )]
    HorizonUnreachable {
        process: ProcessKind,
        first: NaiveDateTime,
        target_end: NaiveDateTime,
        step_minutes: i64,
    },
}

/// A sampled loss curve violated its construction invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveConstructionError {
    #[error("loss curve needs at least 2 breakpoints, got {count}")]
    TooFewBreakpoints { count: usize },

    #[error("invalid flow domain [{min}, {max}] with {segments} segments")]
    InvalidDomain { min: f64, max: f64, segments: usize },

    #[error("breakpoint {index} is not finite")]
    NonFinite { index: usize },

    #[error("breakpoint flows must strictly increase: {previous} then {current} at index {index}")]
    NonIncreasingFlow {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error(
        "loss curve is not convex at segment {segment}: slope {slope_before} followed by {slope_after} (breakpoints {breakpoints:?})"
    )]
    NonConvex {
        segment: usize,
        slope_before: f64,
        slope_after: f64,
        /// The three (flow, loss) points around the offending kink
        breakpoints: Vec<(f64, f64)>,
    },
}

/// A snapshot lacked data the formulation references.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulationError {
    #[error("interconnector {interconnector} references unknown region {region}")]
    UnknownRegion {
        interconnector: InterconnectorId,
        region: RegionId,
    },

    #[error("no demand recorded for region {0} referenced by a loss model")]
    MissingRegionDemand(RegionId),

    #[error("region {0} appears more than once in the snapshot")]
    DuplicateRegion(RegionId),

    #[error("no loss curve built for interconnector {0}")]
    MissingLossCurve(InterconnectorId),

    #[error("battery is connected to region {0}, which is not in the snapshot")]
    BatteryRegionMissing(RegionId),

    #[error("interval length must be positive, got {0} minutes")]
    InvalidIntervalLength(f64),
}

/// The external solver did not return a usable optimum.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveFailure {
    #[error("problem is infeasible: {0}")]
    Infeasible(String),

    #[error("problem is unbounded")]
    Unbounded,

    #[error("numerical failure: {0}")]
    Numeric(String),

    #[error("solver timed out after {seconds:.1} s")]
    Timeout { seconds: f64 },

    #[error("solve cancelled")]
    Cancelled,

    #[error("backend cannot solve this problem: {0}")]
    Unsupported(String),

    #[error(
        "{interconnector} losses of {loss_mw:.4} MW at flow {flow_mw:.4} MW are off the loss curve ({curve_mw:.4} MW)"
    )]
    LossesOffCurve {
        interconnector: InterconnectorId,
        flow_mw: f64,
        loss_mw: f64,
        curve_mw: f64,
    },
}

/// Where in a run an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalContext {
    pub process: ProcessKind,
    pub timestamp: NaiveDateTime,
    pub interval_index: usize,
}

impl IntervalContext {
    pub fn new(process: ProcessKind, timestamp: NaiveDateTime, interval_index: usize) -> Self {
        Self {
            process,
            timestamp,
            interval_index,
        }
    }
}

impl fmt::Display for IntervalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} interval {} at {}",
            self.process,
            self.interval_index,
            self.timestamp.format(MARKET_DATETIME_FORMAT)
        )
    }
}

/// Fatal error of a dispatch reconstruction run.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("{context}: loss curve for {interconnector}: {source}")]
    Curve {
        context: IntervalContext,
        interconnector: InterconnectorId,
        #[source]
        source: CurveConstructionError,
    },

    #[error("{context}: formulation failed: {source}")]
    Formulation {
        context: IntervalContext,
        #[source]
        source: FormulationError,
    },

    #[error("{context}: snapshot unavailable: {source}")]
    Snapshot {
        context: IntervalContext,
        #[source]
        source: SnapshotError,
    },

    #[error("{context}: solve failed: {source}")]
    Solve {
        context: IntervalContext,
        #[source]
        source: SolveFailure,
    },
}

impl DispatchError {
    /// Context of the failing interval, if the error belongs to one.
    pub fn context(&self) -> Option<&IntervalContext> {
        match self {
            DispatchError::Planning(_) => None,
            DispatchError::Curve { context, .. }
            | DispatchError::Formulation { context, .. }
            | DispatchError::Snapshot { context, .. }
            | DispatchError::Solve { context, .. } => Some(context),
        }
    }
}

/// Convenience type alias for Results using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
