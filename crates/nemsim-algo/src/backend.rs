//! Translation of a [`DispatchProblem`] into `good_lp` and back.
//!
//! Numeric solving is delegated entirely to the external engines behind `good_lp`:
//!
//! | Backend | Problem classes | Notes |
//! |---------|-----------------|-------|
//! | Clarabel | LP | Interior point, pure Rust, default |
//! | microlp | LP, MIP | Simplex with branch and bound, pure Rust |
//! | HiGHS | LP, MIP | Native library, `solver-highs` feature |
//!
//! A problem with binary variables handed to an LP-only backend fails with
//! [`SolveFailure::Unsupported`]; it is never relaxed silently.
//!
//! A deadline solve also hands the engine its own time limit, slightly past the
//! orchestrator's deadline, so an abandoned solve stops instead of running on. A
//! solution the engine reports as interrupted is never accepted as an optimum.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use good_lp::solvers::clarabel::clarabel as clarabel_solver;
#[cfg(feature = "solver-highs")]
use good_lp::solvers::highs::highs as highs_solver;
use good_lp::solvers::microlp::microlp as microlp_solver;
use good_lp::{
    constraint, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolutionStatus, SolverModel, Variable, WithTimeLimit,
};
use nemsim_core::SolveFailure;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::problem::{DispatchProblem, LinearExpr, PrimalSolution, Sense, VarKind};

/// How often a waiting orchestrator re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(50);
/// Engine time limit beyond the orchestrator's deadline.
const ENGINE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LpSolverKind {
    #[default]
    Clarabel,
    Microlp,
    #[cfg(feature = "solver-highs")]
    Highs,
}

const AVAILABLE_LP_SOLVERS: &[&str] = &[
    "clarabel",
    "microlp",
    #[cfg(feature = "solver-highs")]
    "highs",
];

impl LpSolverKind {
    pub fn available() -> &'static [&'static str] {
        AVAILABLE_LP_SOLVERS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LpSolverKind::Clarabel => "clarabel",
            LpSolverKind::Microlp => "microlp",
            #[cfg(feature = "solver-highs")]
            LpSolverKind::Highs => "highs",
        }
    }

    /// Whether the backend can branch on binary variables.
    pub fn supports_integers(&self) -> bool {
        !matches!(self, LpSolverKind::Clarabel)
    }
}

fn unknown_solver_error(label: &str) -> anyhow::Error {
    anyhow!(
        "unknown lp solver '{}'; supported values: {}",
        label,
        LpSolverKind::available().join(", ")
    )
}

impl FromStr for LpSolverKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.to_ascii_lowercase();
        match normalized.as_str() {
            "clarabel" => Ok(LpSolverKind::Clarabel),
            "microlp" | "minilp" => Ok(LpSolverKind::Microlp),
            "highs" => {
                #[cfg(feature = "solver-highs")]
                {
                    Ok(LpSolverKind::Highs)
                }
                #[cfg(not(feature = "solver-highs"))]
                {
                    Err(unknown_solver_error(&normalized))
                }
            }
            other => Err(unknown_solver_error(other)),
        }
    }
}

impl std::fmt::Display for LpSolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag used to abandon an in-flight solve.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Solve `problem` synchronously on the calling thread.
pub fn solve(problem: &DispatchProblem, kind: LpSolverKind) -> Result<PrimalSolution, SolveFailure> {
    solve_with_limit(problem, kind, None)
}

fn solve_with_limit(
    problem: &DispatchProblem,
    kind: LpSolverKind,
    time_limit: Option<Duration>,
) -> Result<PrimalSolution, SolveFailure> {
    if problem.has_integers() && !kind.supports_integers() {
        return Err(SolveFailure::Unsupported(format!(
            "{} cannot branch on binary variables; choose microlp or highs",
            kind
        )));
    }

    let mut vars = ProblemVariables::new();
    let handles: Vec<Variable> = problem
        .variables()
        .iter()
        .map(|def| {
            let mut definition = variable();
            if def.kind == VarKind::Binary {
                definition = definition.binary();
            }
            if def.lower.is_finite() {
                definition = definition.min(def.lower);
            }
            if def.upper.is_finite() {
                definition = definition.max(def.upper);
            }
            vars.add(definition)
        })
        .collect();

    let objective = to_expression(problem.objective(), &handles);
    let unsolved = vars.minimise(objective);

    let seconds = time_limit.map(|limit| limit.as_secs_f64());
    let map_error = |e: ResolutionError| map_resolution_error(e, problem, seconds);
    let solution: Box<dyn Solution> = match kind {
        LpSolverKind::Clarabel => {
            let mut model = unsolved.using(clarabel_solver);
            if let Some(seconds) = seconds {
                model.settings().time_limit(seconds);
            }
            let model = add_constraints(model, problem, &handles);
            Box::new(model.solve().map_err(map_error)?)
        }
        LpSolverKind::Microlp => {
            let mut model = unsolved.using(microlp_solver);
            if let Some(seconds) = seconds {
                model = model.with_time_limit(seconds);
            }
            let model = add_constraints(model, problem, &handles);
            Box::new(model.solve().map_err(map_error)?)
        }
        #[cfg(feature = "solver-highs")]
        LpSolverKind::Highs => {
            let mut model = unsolved.using(highs_solver);
            if let Some(seconds) = seconds {
                model = model.with_time_limit(seconds);
            }
            let model = add_constraints(model, problem, &handles);
            Box::new(model.solve().map_err(map_error)?)
        }
    };
    if !matches!(solution.status(), SolutionStatus::Optimal) {
        return Err(SolveFailure::Timeout {
            seconds: seconds.unwrap_or_default(),
        });
    }

    let values: Vec<f64> = handles.iter().map(|v| solution.value(*v)).collect();
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(SolveFailure::Numeric(format!(
            "non-finite value for variable {}",
            problem.variables()[index].name
        )));
    }
    // Objective is recomputed from primal values so every backend reports it identically.
    let objective = problem.objective().evaluate(&values);
    Ok(PrimalSolution::new(values, objective))
}

/// Solve on a worker thread, giving up after `timeout` or when `cancel` is raised.
///
/// An abandoned solve runs on detached until the engine returns, which with a
/// `timeout` is bounded by the engine's own time limit. Its result is discarded and
/// never observed by the caller.
pub fn solve_with_deadline(
    problem: DispatchProblem,
    kind: LpSolverKind,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<PrimalSolution, SolveFailure> {
    if cancel.is_cancelled() {
        return Err(SolveFailure::Cancelled);
    }

    let (tx, rx) = mpsc::channel();
    let engine_limit = timeout.map(|limit| limit + ENGINE_GRACE);
    thread::Builder::new()
        .name("nemsim-solve".to_string())
        .spawn(move || {
            let _ = tx.send(solve_with_limit(&problem, kind, engine_limit));
        })
        .map_err(|e| SolveFailure::Numeric(format!("failed to start solver thread: {e}")))?;

    let started = Instant::now();
    loop {
        let wait = match timeout {
            Some(limit) => {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    warn!(backend = %kind, seconds = limit.as_secs_f64(), "abandoning solve after timeout");
                    return Err(SolveFailure::Timeout {
                        seconds: limit.as_secs_f64(),
                    });
                }
                (limit - elapsed).min(CANCEL_POLL)
            }
            None => CANCEL_POLL,
        };
        match rx.recv_timeout(wait) {
            Ok(result) => {
                debug!(backend = %kind, elapsed_ms = started.elapsed().as_millis() as u64, "solve returned");
                return result;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Err(SolveFailure::Cancelled);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(SolveFailure::Numeric(
                    "solver thread exited without a result".to_string(),
                ));
            }
        }
    }
}

fn to_expression(expr: &LinearExpr, handles: &[Variable]) -> Expression {
    let mut out = Expression::from(expr.constant);
    for (var, coefficient) in &expr.terms {
        out += *coefficient * handles[var.index()];
    }
    out
}

fn add_constraints<M>(mut model: M, problem: &DispatchProblem, handles: &[Variable]) -> M
where
    M: SolverModel,
{
    for row in problem.constraints() {
        let lhs = to_expression(&row.expr, handles);
        let rhs = row.rhs;
        model = match row.sense {
            Sense::Le => model.with(constraint!(lhs <= rhs)),
            Sense::Ge => model.with(constraint!(lhs >= rhs)),
            Sense::Eq => model.with(constraint!(lhs == rhs)),
        };
    }
    model
}

fn map_resolution_error(
    error: ResolutionError,
    problem: &DispatchProblem,
    time_limit: Option<f64>,
) -> SolveFailure {
    match error {
        ResolutionError::Other(message) if time_limit.is_some() && message.starts_with("Time limit") => {
            SolveFailure::Timeout {
                seconds: time_limit.unwrap_or_default(),
            }
        }
        ResolutionError::Infeasible => SolveFailure::Infeasible(format!(
            "no point satisfies {} constraints over {} variables",
            problem.num_constraints(),
            problem.num_variables()
        )),
        ResolutionError::Unbounded => SolveFailure::Unbounded,
        ResolutionError::Other(message) => SolveFailure::Numeric(message.to_string()),
        ResolutionError::Str(message) => SolveFailure::Numeric(message),
    }
}
