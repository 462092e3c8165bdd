use anyhow::Result;
use nemsim_batch::{run_window, RunVerdict, WindowReport, WindowTask};
use nemsim_cli::RunArgs;
use nemsim_core::{CarriedState, MARKET_DATETIME_FORMAT};
use nemsim_io::write_outcome;
use tracing::info;

use crate::commands::util::{load_run_config, window_context};

pub fn handle(args: &RunArgs) -> Result<RunVerdict> {
    let config = load_run_config(&args.solve)?;
    let battery = config.battery_state(args.battery_capacity, args.battery_power)?;
    let context = window_context(&args.solve, config)?;

    let task = WindowTask::new(args.process, args.start, CarriedState::new(battery))
        .chained_from_predispatch(args.chain_from_predispatch);
    info!(window = %task.window_id, "running");
    let report = run_window(task, &context)?;
    let paths = write_outcome(&args.solve.out, &report.outcome, &report.prices)?;

    print_report(&report);
    println!("Objective: {}", paths.objective.display());
    println!("Interconnectors: {}", paths.interconnectors.display());
    println!("Regions: {}", paths.regions.display());
    Ok(report.verdict())
}

fn print_report(report: &WindowReport) {
    let outcome = &report.outcome;
    let records = outcome.records();
    let failures = outcome.failures().count();
    if let Some(seed) = &report.seeded_from {
        println!(
            "Seeded from predispatch ({} intervals)",
            seed.records().len()
        );
    }
    println!(
        "{} {}: {} of {} intervals solved, {} warnings",
        outcome.process(),
        report.window_id,
        records.len() - failures,
        outcome.plan().len(),
        report.warnings.len()
    );
    for (record, failure) in outcome.failures() {
        println!(
            "  {} {} at {}: {}",
            record.status.as_str(),
            record.index,
            record.timestamp.format(MARKET_DATETIME_FORMAT),
            failure
        );
    }
    if !outcome.is_complete() {
        println!("  run stopped before the end of the plan");
    }
    println!("Status: {}", report.verdict().as_str());
}
