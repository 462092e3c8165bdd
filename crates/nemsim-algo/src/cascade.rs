//! Sequential solve of one process run across its interval plan.
//!
//! A [`Cascade`] walks its [`IntervalPlan`] strictly in order:
//!
//! ```text
//! Idle → Formulating(0) → Solving(0) → Extracted(0) → Formulating(1) → … → Done
//! ```
//!
//! Each interval is formulated from a fresh snapshot plus the [`CarriedState`]
//! extracted from the previous interval, solved on a worker thread with an optional
//! deadline, and its values are read back before the next interval starts. A solve
//! failure is handled by the run's explicit [`FailurePolicy`]; every other error is
//! fatal and carries the interval's reproduction context.
//!
//! A tangent-encoded interval whose solved losses leave the loss curve is solved once
//! more with the convex-combination encoding when the backend takes integers. On an
//! LP-only backend it fails with [`SolveFailure::LossesOffCurve`].
//!
//! `run` consumes the cascade, so a follow-on cascade can only be seeded from a
//! finished [`CascadeOutcome`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use nemsim_core::{
    CarriedState, CurveConstructionError, DispatchError, DispatchResult, FormulationError,
    IntervalContext, MarketSnapshot, MarketSnapshotLoader, ProcessKind, SolveFailure,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{solve_with_deadline, CancellationToken, LpSolverKind};
use crate::formulation::{DispatchFormulator, FormulatedInterval, FormulationOptions, IntervalInputs};
use crate::losses::{CurveSetError, LinearizerConfig, LossCurveSet, LossEncoding, LossLinearizer};
use crate::schedule::IntervalPlan;
use crate::solution::IntervalSolution;

/// Observable position of a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CascadeState {
    Idle,
    Formulating(usize),
    Solving(usize),
    Extracted(usize),
    Done,
}

/// What to do when an interval's solve fails. Deliberately has no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the run at the failed interval
    Abort,
    /// Repeat the last good state forward and keep solving
    HoldLastState,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::HoldLastState => "hold-last-state",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "hold-last-state" | "hold" => Ok(FailurePolicy::HoldLastState),
            other => Err(format!(
                "unknown failure policy '{other}' (expected abort or hold-last-state)"
            )),
        }
    }
}

/// Per-run solve settings.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub solver: LpSolverKind,
    pub timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub formulation: FormulationOptions,
    linearizer: LossLinearizer,
}

impl CascadeConfig {
    pub fn new(failure_policy: FailurePolicy) -> Result<Self, CurveConstructionError> {
        Ok(Self {
            solver: LpSolverKind::default(),
            timeout: None,
            failure_policy,
            formulation: FormulationOptions::default(),
            linearizer: LossLinearizer::new(LinearizerConfig::default())?,
        })
    }

    pub fn with_solver(mut self, solver: LpSolverKind) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_formulation(mut self, formulation: FormulationOptions) -> Self {
        self.formulation = formulation;
        self
    }

    pub fn with_linearizer(mut self, config: LinearizerConfig) -> Result<Self, CurveConstructionError> {
        self.linearizer = LossLinearizer::new(config)?;
        Ok(self)
    }

    pub fn linearizer(&self) -> &LossLinearizer {
        &self.linearizer
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntervalStatus {
    Solved,
    /// Solve failed; the previous solution was repeated forward
    Held(SolveFailure),
    /// Solve failed and the run stopped here
    Failed(SolveFailure),
}

impl IntervalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalStatus::Solved => "solved",
            IntervalStatus::Held(_) => "held",
            IntervalStatus::Failed(_) => "failed",
        }
    }

    pub fn failure(&self) -> Option<&SolveFailure> {
        match self {
            IntervalStatus::Solved => None,
            IntervalStatus::Held(failure) | IntervalStatus::Failed(failure) => Some(failure),
        }
    }
}

/// One interval of a finished cascade.
#[derive(Debug, Clone)]
pub struct IntervalRecord {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub minutes: f64,
    pub status: IntervalStatus,
    /// Modeled outcome; absent when nothing was solved yet
    pub solution: Option<IntervalSolution>,
    /// The recorded snapshot the interval was formulated from
    pub snapshot: MarketSnapshot,
}

/// Result of a cascade that reached `Done`.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    plan: IntervalPlan,
    records: Vec<IntervalRecord>,
    terminal: CarriedState,
    transitions: Vec<CascadeState>,
    aborted: bool,
}

impl CascadeOutcome {
    pub fn process(&self) -> ProcessKind {
        self.plan.process()
    }

    pub fn plan(&self) -> &IntervalPlan {
        &self.plan
    }

    pub fn records(&self) -> &[IntervalRecord] {
        &self.records
    }

    /// State after the last extracted interval, used to seed a follow-on cascade.
    pub fn terminal(&self) -> &CarriedState {
        &self.terminal
    }

    pub fn transitions(&self) -> &[CascadeState] {
        &self.transitions
    }

    /// True when every planned interval has a record.
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.records.len() == self.plan.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&IntervalRecord, &SolveFailure)> {
        self.records
            .iter()
            .filter_map(|r| r.status.failure().map(|f| (r, f)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

pub struct Cascade {
    plan: IntervalPlan,
    loader: Arc<dyn MarketSnapshotLoader>,
    config: CascadeConfig,
    carried: CarriedState,
    cancel: CancellationToken,
    state: CascadeState,
    transitions: Vec<CascadeState>,
}

impl Cascade {
    pub fn new(
        plan: IntervalPlan,
        loader: Arc<dyn MarketSnapshotLoader>,
        config: CascadeConfig,
        seed: CarriedState,
    ) -> Self {
        Self {
            plan,
            loader,
            config,
            carried: seed,
            cancel: CancellationToken::new(),
            state: CascadeState::Idle,
            transitions: vec![CascadeState::Idle],
        }
    }

    /// Seed a cascade with the terminal state of a finished one.
    ///
    /// Only the battery crosses over; see [`CarriedState::handed_over`].
    pub fn chained(
        previous: &CascadeOutcome,
        plan: IntervalPlan,
        loader: Arc<dyn MarketSnapshotLoader>,
        config: CascadeConfig,
    ) -> Self {
        info!(
            from = %previous.process(),
            to = %plan.process(),
            soc_mwh = previous.terminal().battery.as_ref().map(|b| b.soc_mwh),
            "seeding cascade from previous outcome"
        );
        Self::new(plan, loader, config, previous.terminal().handed_over())
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    pub fn plan(&self) -> &IntervalPlan {
        &self.plan
    }

    fn solve_formulated(
        &self,
        formulated: FormulatedInterval,
        snapshot: &MarketSnapshot,
    ) -> Result<(IntervalSolution, CarriedState), SolveFailure> {
        let FormulatedInterval { problem, layout } = formulated;
        solve_with_deadline(problem, self.config.solver, self.config.timeout, &self.cancel)
            .and_then(|primal| layout.extract(&primal, snapshot, &self.carried))
    }

    fn transition(&mut self, next: CascadeState) {
        debug!(from = ?self.state, to = ?next, "cascade transition");
        self.state = next;
        self.transitions.push(next);
    }

    pub fn run(mut self) -> DispatchResult<CascadeOutcome> {
        let process = self.plan.process();
        info!(
            process = %process,
            intervals = self.plan.len(),
            first = ?self.plan.first(),
            last = ?self.plan.last(),
            solver = %self.config.solver,
            "starting cascade"
        );
        let formulator = DispatchFormulator::new(self.config.formulation.clone());
        // tangent losses can leave the curve; a MIP backend can re-solve exactly
        let exact_fallback = (self.config.formulation.loss_encoding == LossEncoding::Tangent
            && self.config.solver.supports_integers())
        .then(|| {
            DispatchFormulator::new(FormulationOptions {
                loss_encoding: LossEncoding::ConvexCombination,
                ..self.config.formulation.clone()
            })
        });
        let mut records: Vec<IntervalRecord> = Vec::with_capacity(self.plan.len());
        let mut last_solution: Option<IntervalSolution> = None;
        let mut aborted = false;

        let times = self.plan.times().to_vec();
        for (index, timestamp) in times.into_iter().enumerate() {
            let context = IntervalContext::new(process, timestamp, index);
            let minutes = self.plan.interval_minutes(index);
            self.transition(CascadeState::Formulating(index));

            let snapshot = self
                .loader
                .load_regions_and_interconnectors(timestamp)
                .map_err(|source| DispatchError::Snapshot {
                    context: context.clone(),
                    source,
                })?;
            let curves = LossCurveSet::build(&snapshot, &self.config.linearizer)
                .map_err(|e| curve_error(context.clone(), e))?;
            let carried = self.carried.clone();
            let inputs = IntervalInputs {
                process,
                interval_index: index,
                minutes,
                snapshot: &snapshot,
                curves: &curves,
                carried: &carried,
            };
            let formulated = formulator
                .formulate(&inputs)
                .map_err(|source| formulation_error(&context, source))?;

            self.transition(CascadeState::Solving(index));
            let mut result = self.solve_formulated(formulated, &snapshot);
            if let (Err(failure @ SolveFailure::LossesOffCurve { .. }), Some(exact)) =
                (&result, &exact_fallback)
            {
                warn!(interval = %context, error = %failure, "re-solving with convex-combination losses");
                let formulated = exact
                    .formulate(&inputs)
                    .map_err(|source| formulation_error(&context, source))?;
                result = self.solve_formulated(formulated, &snapshot);
            }

            match result {
                Ok((solution, next)) => {
                    debug!(interval = %context, objective = solution.objective, "interval solved");
                    self.carried = next;
                    last_solution = Some(solution.clone());
                    records.push(IntervalRecord {
                        index,
                        timestamp,
                        minutes,
                        status: IntervalStatus::Solved,
                        solution: Some(solution),
                        snapshot,
                    });
                    self.transition(CascadeState::Extracted(index));
                }
                Err(failure) => {
                    let policy = if failure == SolveFailure::Cancelled {
                        FailurePolicy::Abort
                    } else {
                        self.config.failure_policy
                    };
                    warn!(interval = %context, error = %failure, policy = %policy, "interval solve failed");
                    match policy {
                        FailurePolicy::Abort => {
                            records.push(IntervalRecord {
                                index,
                                timestamp,
                                minutes,
                                status: IntervalStatus::Failed(failure),
                                solution: None,
                                snapshot,
                            });
                            aborted = true;
                            break;
                        }
                        FailurePolicy::HoldLastState => {
                            records.push(IntervalRecord {
                                index,
                                timestamp,
                                minutes,
                                status: IntervalStatus::Held(failure),
                                solution: last_solution.as_ref().map(|s| s.held_at(timestamp)),
                                snapshot,
                            });
                            self.transition(CascadeState::Extracted(index));
                        }
                    }
                }
            }
        }

        self.transition(CascadeState::Done);
        info!(
            process = %process,
            solved = records.iter().filter(|r| r.status == IntervalStatus::Solved).count(),
            intervals = self.plan.len(),
            aborted,
            "cascade done"
        );
        Ok(CascadeOutcome {
            plan: self.plan,
            records,
            terminal: self.carried,
            transitions: self.transitions,
            aborted,
        })
    }
}

fn formulation_error(context: &IntervalContext, source: FormulationError) -> DispatchError {
    DispatchError::Formulation {
        context: context.clone(),
        source,
    }
}

fn curve_error(context: IntervalContext, error: CurveSetError) -> DispatchError {
    match error {
        CurveSetError::Formulation(source) => DispatchError::Formulation { context, source },
        CurveSetError::Curve {
            interconnector,
            source,
        } => DispatchError::Curve {
            context,
            interconnector,
            source,
        },
    }
}
