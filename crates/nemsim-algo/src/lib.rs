//! # nemsim-algo: Cascading Dispatch Formulation and Solve Engine
//!
//! Reconstructs the market operator's dispatch process for the three cascading
//! stages (5-minute dispatch, P5MIN and PREDISPATCH), one interval at a time.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Interval Scheduler | [`schedule`] | [`IntervalPlan`] spanning a fixed horizon |
//! | Constraint Policy | [`policy`] | Which constraint families apply per interval |
//! | Loss Linearizer | [`losses`] | Convex [`LossCurve`] and its encoding |
//! | Dispatch Formulator | [`formulation`] | Owned [`DispatchProblem`] per interval |
//! | Solver backend | [`backend`] | Primal values from `good_lp` |
//! | Solve Orchestrator | [`cascade`] | [`CascadeOutcome`] and terminal [`nemsim_core::CarriedState`] |
//! | Result Comparator | [`compare`] | [`ComparisonWarning`]s |
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nemsim_algo::*;
//! use nemsim_core::{CarriedState, InMemorySnapshotStore, ProcessKind};
//!
//! let plan = IntervalScheduler::standard().plan(ProcessKind::P5Min, start)?;
//! let config = CascadeConfig::new(FailurePolicy::Abort)?;
//! let outcome = Cascade::new(plan, Arc::new(store), config, CarriedState::default()).run()?;
//! let warnings = ResultComparator::default().compare_outcome(&outcome);
//! ```

pub mod backend;
pub mod cascade;
pub mod compare;
pub mod formulation;
pub mod losses;
pub mod policy;
pub mod problem;
pub mod schedule;
pub mod solution;

pub use backend::{solve, solve_with_deadline, CancellationToken, LpSolverKind};
pub use cascade::{
    Cascade, CascadeConfig, CascadeOutcome, CascadeState, FailurePolicy, IntervalRecord,
    IntervalStatus,
};
pub use compare::{
    ComparisonSubject, ComparisonWarning, RecordedPrices, ResultComparator, DEFAULT_TOLERANCE,
};
pub use formulation::{
    DispatchFormulator, FormulatedInterval, FormulationOptions, IntervalInputs, SolutionLayout,
};
pub use losses::{
    LinearizerConfig, LossCurve, LossCurveSet, LossEncoding, LossLinearizer,
};
pub use policy::{
    applies_every_interval_or_first, applies_every_interval_or_first_p5min, cvp_applicable,
    CvpSettings,
};
pub use problem::{DispatchProblem, LinearExpr, PrimalSolution, ProblemBuilder, Sense, VarId};
pub use schedule::{IntervalPlan, IntervalScheduler, P5MIN_INTERVALS};
pub use solution::{BatteryResult, IntervalSolution, InterconnectorResult, RegionResult};
