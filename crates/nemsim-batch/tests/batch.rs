//! Batch window tests

use std::fs;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use nemsim_algo::IntervalScheduler;
use nemsim_batch::{
    load_batch_manifest, run_batch, run_window, BatchRunnerConfig, RunVerdict, WindowContext,
    WindowTask,
};
use nemsim_core::{
    BatteryState, CarriedState, InMemorySnapshotStore, MarketSnapshot, Offer, ProcessKind,
    RegionSnapshot,
};
use nemsim_io::RunConfig;
use tempfile::tempdir;

fn day_start() -> NaiveDateTime {
    "2024-07-01T04:00:00".parse().unwrap()
}

/// Snapshots every five minutes for a whole trading day.
fn store(recorded_generation: f64) -> InMemorySnapshotStore {
    let mut store = InMemorySnapshotStore::new();
    for i in 0..288 {
        let ts = day_start() + Duration::minutes(5 * i);
        let price = if i % 12 < 6 { 20.0 } else { 90.0 };
        store.insert_snapshot(MarketSnapshot::new(
            ts,
            vec![RegionSnapshot::new("SA1", 1_000.0)
                .with_offer(Offer::new(price, 2_500.0))
                .with_recorded(price, recorded_generation, 0.0, 0.0)],
            vec![],
        ));
    }
    store
}

fn context(store: InMemorySnapshotStore) -> WindowContext {
    WindowContext {
        loader: Arc::new(store),
        scheduler: IntervalScheduler::standard(),
        config: RunConfig::from_toml_str(
            "[solver]\nbackend = \"microlp\"\n[run]\nfailure_policy = \"abort\"\n",
        )
        .expect("valid configuration"),
    }
}

#[test]
fn test_windows_run_in_parallel_and_write_manifest() {
    let out = tempdir().unwrap();
    let tasks: Vec<WindowTask> = (0..6)
        .map(|i| {
            WindowTask::new(
                ProcessKind::P5Min,
                day_start() + Duration::minutes(30 * i + 5),
                CarriedState::default(),
            )
        })
        .collect();
    let ids: Vec<String> = tasks.iter().map(|t| t.window_id.clone()).collect();

    let summary = run_batch(BatchRunnerConfig {
        tasks,
        output_root: out.path().to_path_buf(),
        threads: 3,
        context: context(store(1_000.0)),
    })
    .expect("batch run");

    assert_eq!(summary.success, 6);
    assert_eq!(summary.failure, 0);
    assert_eq!(summary.verdict(), RunVerdict::Clean);
    let order: Vec<String> = summary.windows.iter().map(|w| w.window_id.clone()).collect();
    assert_eq!(order, ids, "records keep task order");

    let manifest = load_batch_manifest(&summary.manifest_path).unwrap();
    assert_eq!(manifest.num_windows, 6);
    assert_eq!(manifest.process, "p5min");
    for window in &manifest.windows {
        assert_eq!(window.intervals, 12);
        assert_eq!(window.solved, 12);
        let objective = fs::read_to_string(out.path().join(&window.window_id).join("objective.csv"))
            .expect("per-window export");
        assert_eq!(objective.lines().count(), 13);
    }
}

#[test]
fn test_discrepancy_and_errors_are_reported_per_window() {
    let out = tempdir().unwrap();
    let tasks = vec![
        WindowTask::new(ProcessKind::Dispatch, day_start(), CarriedState::default()),
        // no snapshot exists this far out
        WindowTask::new(
            ProcessKind::Dispatch,
            day_start() + Duration::days(3),
            CarriedState::default(),
        ),
    ];
    let summary = run_batch(BatchRunnerConfig {
        tasks,
        output_root: out.path().to_path_buf(),
        threads: 0,
        context: context(store(990.0)),
    })
    .unwrap();

    assert_eq!(summary.windows[0].status, RunVerdict::Discrepancy);
    assert!(summary.windows[0].warnings > 0);
    assert_eq!(summary.windows[1].status, RunVerdict::Error);
    let error = summary.windows[1].error.as_deref().unwrap();
    assert!(error.contains("snapshot unavailable"), "{error}");
    assert_eq!(summary.success, 1);
    assert_eq!(summary.failure, 1);
    assert_eq!(summary.verdict(), RunVerdict::Error);
    assert_eq!(summary.verdict().exit_code(), 3);
}

#[test]
fn test_chained_window_starts_from_predispatch_terminal_state() {
    let battery = BatteryState::new("SA1", 50.0, 25.0, 0.81)
        .unwrap()
        .with_costs(0.0, 50.0);
    let task = WindowTask::new(
        ProcessKind::P5Min,
        day_start() + Duration::minutes(5),
        CarriedState::new(Some(battery)),
    )
    .chained_from_predispatch(true);

    let report = run_window(task, &context(store(1_000.0))).expect("chained window");
    let seed = report.seeded_from.as_ref().expect("predispatch ran first");
    assert_eq!(seed.process(), ProcessKind::Predispatch);
    assert!(seed.is_complete());

    let handed_over = seed.terminal().battery.as_ref().unwrap().soc_mwh;
    let record = &report.outcome.records()[0];
    let first = record
        .solution
        .as_ref()
        .and_then(|s| s.battery.as_ref())
        .unwrap();
    let h = record.minutes / 60.0;
    let expected = handed_over + (0.9 * first.charge_mw - first.discharge_mw / 0.9) * h;
    assert!(
        (first.soc_mwh - expected).abs() < 1e-4,
        "first p5min soc {} should continue from {handed_over}",
        first.soc_mwh
    );
}
