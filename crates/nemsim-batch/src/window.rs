use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use nemsim_algo::{
    Cascade, CascadeOutcome, ComparisonWarning, IntervalScheduler, RecordedPrices,
};
use nemsim_core::{CarriedState, DispatchError, MarketSnapshotLoader, ProcessKind};
use nemsim_io::RunConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One independent reconstruction run. Owns everything that varies per window.
#[derive(Debug, Clone)]
pub struct WindowTask {
    pub window_id: String,
    pub process: ProcessKind,
    pub start: NaiveDateTime,
    pub seed: CarriedState,
    /// Run predispatch from the same start first and seed this run from its terminal state
    pub chain_from_predispatch: bool,
}

impl WindowTask {
    pub fn new(process: ProcessKind, start: NaiveDateTime, seed: CarriedState) -> Self {
        Self {
            window_id: format!("{}-{}", process, start.format("%Y%m%d%H%M")),
            process,
            start,
            seed,
            chain_from_predispatch: false,
        }
    }

    pub fn chained_from_predispatch(mut self, chain: bool) -> Self {
        self.chain_from_predispatch = chain;
        self
    }
}

/// Read-only inputs shared by every window of a process invocation.
#[derive(Clone)]
pub struct WindowContext {
    pub loader: Arc<dyn MarketSnapshotLoader>,
    pub scheduler: IntervalScheduler,
    pub config: RunConfig,
}

/// How a window ended, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunVerdict {
    Clean,
    Discrepancy,
    SolveFailure,
    Error,
}

impl RunVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunVerdict::Clean => "ok",
            RunVerdict::Discrepancy => "discrepancy",
            RunVerdict::SolveFailure => "solve-failure",
            RunVerdict::Error => "error",
        }
    }

    /// Process exit code of a run that ended this way.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunVerdict::Clean => 0,
            RunVerdict::Discrepancy => 1,
            RunVerdict::SolveFailure => 2,
            RunVerdict::Error => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window_id: String,
    /// Predispatch run the window was seeded from, if chained
    pub seeded_from: Option<CascadeOutcome>,
    pub outcome: CascadeOutcome,
    pub warnings: Vec<ComparisonWarning>,
    pub prices: RecordedPrices,
}

impl WindowReport {
    pub fn verdict(&self) -> RunVerdict {
        if self.outcome.has_failures() || !self.outcome.is_complete() {
            RunVerdict::SolveFailure
        } else if !self.warnings.is_empty() {
            RunVerdict::Discrepancy
        } else {
            RunVerdict::Clean
        }
    }
}

/// Plan, solve and compare one window.
pub fn run_window(task: WindowTask, ctx: &WindowContext) -> Result<WindowReport> {
    let WindowTask {
        window_id,
        process,
        start,
        seed,
        chain_from_predispatch,
    } = task;
    let cascade_config = ctx
        .config
        .cascade_config()
        .context("building cascade configuration")?;
    let plan = ctx
        .scheduler
        .plan(process, start)
        .map_err(DispatchError::from)
        .with_context(|| format!("planning {window_id}"))?;

    let seeded_from = if chain_from_predispatch && process != ProcessKind::Predispatch {
        let predispatch = ctx
            .scheduler
            .plan(ProcessKind::Predispatch, start)
            .map_err(DispatchError::from)
            .with_context(|| format!("planning predispatch seed of {window_id}"))?;
        let outcome = Cascade::new(predispatch, ctx.loader.clone(), cascade_config.clone(), seed.clone())
            .run()
            .with_context(|| format!("predispatch seed of {window_id}"))?;
        if !outcome.is_complete() {
            warn!(window = %window_id, "predispatch seed stopped early; chaining its last state");
        }
        Some(outcome)
    } else {
        None
    };

    let cascade = match &seeded_from {
        Some(previous) => Cascade::chained(previous, plan, ctx.loader.clone(), cascade_config),
        None => Cascade::new(plan, ctx.loader.clone(), cascade_config, seed),
    };
    let outcome = cascade.run().with_context(|| format!("running {window_id}"))?;

    let warnings = ctx.config.comparator().compare_outcome(&outcome);
    let prices = RecordedPrices::collect(ctx.loader.as_ref(), &outcome);
    info!(
        window = %window_id,
        intervals = outcome.records().len(),
        warnings = warnings.len(),
        complete = outcome.is_complete(),
        "window finished"
    );
    Ok(WindowReport {
        window_id,
        seeded_from,
        outcome,
        warnings,
        prices,
    })
}
