use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nemsim_algo::IntervalScheduler;
use nemsim_batch::WindowContext;
use nemsim_cli::SolveArgs;
use nemsim_io::{load_interval_counts, DirectorySnapshotLoader, RunConfig};
use tracing::info;

/// Load the run configuration and apply command-line overrides.
///
/// Without a configuration file the failure policy must come from the command line.
pub fn load_run_config(args: &SolveArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(policy) = args.failure_policy {
        config = config.with_failure_policy(policy);
    }
    if let Some(solver) = args.solver {
        config.solver.backend = solver;
    }
    config.validate()?;
    config
        .failure_policy()
        .context("no failure policy; pass --failure-policy or set it in --config")?;
    Ok(config)
}

pub fn scheduler(interval_counts: Option<&Path>) -> Result<IntervalScheduler> {
    match interval_counts {
        Some(path) => {
            let table = load_interval_counts(path)?;
            info!(path = %path.display(), "using custom interval counts");
            Ok(IntervalScheduler::new(Arc::new(table)))
        }
        None => Ok(IntervalScheduler::standard()),
    }
}

/// Everything a window needs apart from its own start and seed.
pub fn window_context(args: &SolveArgs, config: RunConfig) -> Result<WindowContext> {
    let loader = DirectorySnapshotLoader::open(&args.snapshots)?;
    Ok(WindowContext {
        loader: Arc::new(loader),
        scheduler: scheduler(args.interval_counts.as_deref())?,
        config,
    })
}
