use anyhow::Result;
use nemsim_batch::{run_batch, BatchRunnerConfig, BatchSummary, RunVerdict, WindowTask};
use nemsim_cli::BatchArgs;
use nemsim_core::CarriedState;

use crate::commands::util::{load_run_config, window_context};

fn print_batch_summary(summary: &BatchSummary) {
    println!(
        "Windows: {} total, {} succeeded, {} failed",
        summary.windows.len(),
        summary.success,
        summary.failure
    );
    for window in &summary.windows {
        match &window.error {
            Some(error) => println!("  {} error: {}", window.window_id, error),
            None => println!(
                "  {} {}: {}/{} solved, {} warnings",
                window.window_id,
                window.status.as_str(),
                window.solved,
                window.intervals,
                window.warnings
            ),
        }
    }
    println!("Manifest: {}", summary.manifest_path.display());
}

pub fn handle(args: &BatchArgs) -> Result<RunVerdict> {
    let config = load_run_config(&args.solve)?;
    let battery = config.battery_state(None, None)?;
    let context = window_context(&args.solve, config)?;

    let tasks = args
        .starts
        .iter()
        .map(|start| {
            WindowTask::new(args.process, *start, CarriedState::new(battery.clone()))
                .chained_from_predispatch(args.chain_from_predispatch)
        })
        .collect();
    let summary = run_batch(BatchRunnerConfig {
        tasks,
        output_root: args.solve.out.clone(),
        threads: args.threads,
        context,
    })?;
    print_batch_summary(&summary);
    Ok(summary.verdict())
}
