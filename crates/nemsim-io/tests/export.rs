//! Directory loader to CSV export tests

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use nemsim_algo::{Cascade, IntervalScheduler, LpSolverKind, RecordedPrices};
use nemsim_core::{
    CarriedState, InterconnectorSnapshot, LossModel, MarketSnapshot, Offer, PriceKind,
    ProcessKind, RegionId, RegionSnapshot,
};
use nemsim_io::{
    write_outcome, write_prices, write_snapshot, DirectorySnapshotLoader, PriceRecord, RunConfig,
};
use tempfile::tempdir;

fn start() -> NaiveDateTime {
    "2024-05-20T18:00:00".parse().unwrap()
}

fn snapshot(ts: NaiveDateTime, vic_demand: f64) -> MarketSnapshot {
    MarketSnapshot::new(
        ts,
        vec![
            RegionSnapshot::new("VIC1", vic_demand)
                .with_offer(Offer::new(35.0, 6_000.0))
                .with_recorded(41.0, 5_300.0, 0.0, 300.0),
            RegionSnapshot::new("SA1", 1_200.0)
                .with_offer(Offer::new(120.0, 2_000.0))
                .with_recorded(130.0, 900.0, 0.0, -300.0),
        ],
        vec![InterconnectorSnapshot::new(
            "V-SA",
            "VIC1",
            "SA1",
            500.0,
            600.0,
            LossModel::new(0.0, 3e-5),
        )
        .with_recorded(300.0, 2.7)],
    )
    .with_recorded_objective(250_000.0)
}

fn populate(dir: &Path, plan: &[NaiveDateTime], bad: Option<usize>) {
    for (i, ts) in plan.iter().enumerate() {
        let demand = if Some(i) == bad { 50_000.0 } else { 5_000.0 };
        write_snapshot(dir, &snapshot(*ts, demand)).unwrap();
    }
    write_prices(
        dir,
        &[PriceRecord {
            kind: PriceKind::P5Min,
            run_time: plan[0],
            region: RegionId::new("SA1"),
            times: plan.to_vec(),
            prices: plan.iter().map(|_| 128.5).collect(),
        }],
    )
    .unwrap();
}

fn config(policy: &str, cvp: bool) -> RunConfig {
    RunConfig::from_toml_str(&format!(
        "[cvp]\ndispatch_enabled = {cvp}\npredispatch_enabled = {cvp}\n\
         [solver]\nbackend = \"microlp\"\n[run]\nfailure_policy = \"{policy}\"\n"
    ))
    .expect("valid test configuration")
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_p5min_run_exports_three_files() {
    let snapshots = tempdir().unwrap();
    let out = tempdir().unwrap();
    let plan = IntervalScheduler::standard()
        .plan(ProcessKind::P5Min, start())
        .unwrap();
    populate(snapshots.path(), plan.times(), None);

    let loader = Arc::new(DirectorySnapshotLoader::open(snapshots.path()).unwrap());
    assert_eq!(loader.len(), 12);
    let run = config("abort", true);
    let cascade_config = run.cascade_config().unwrap();
    assert_eq!(cascade_config.solver, LpSolverKind::Microlp);
    let outcome = Cascade::new(plan, loader.clone(), cascade_config, CarriedState::default())
        .run()
        .expect("p5min run");
    assert!(outcome.is_complete());

    let prices = RecordedPrices::collect(loader.as_ref(), &outcome);
    let paths = write_outcome(out.path(), &outcome, &prices).unwrap();

    let objective = lines(&paths.objective);
    assert_eq!(
        objective[0],
        "interval_datetime,process,interval_index,status,objective,recorded_objective"
    );
    assert_eq!(objective.len(), 13);
    assert!(objective[1].starts_with("2024/05/20 18:00:00,p5min,0,solved,"));
    assert!(objective[12].starts_with("2024/05/20 18:55:00,p5min,11,solved,"));

    let interconnectors = lines(&paths.interconnectors);
    assert_eq!(
        interconnectors[0],
        "interval_datetime,interconnector_id,flow,recorded_flow,losses,recorded_losses"
    );
    assert_eq!(interconnectors.len(), 13);
    assert!(interconnectors[1].starts_with("2024/05/20 18:00:00,V-SA,"));

    let regions = lines(&paths.regions);
    assert_eq!(
        regions[0],
        "interval_datetime,region_id,net_interchange,recorded_net_interchange,generation,\
         recorded_generation,load,recorded_load,price,recorded_price"
    );
    assert_eq!(regions.len(), 25);
    let sa = regions
        .iter()
        .find(|l| l.starts_with("2024/05/20 18:00:00,SA1,"))
        .unwrap();
    assert!(sa.ends_with(",128.5"), "published p5min price is exported: {sa}");
    let vic = regions
        .iter()
        .find(|l| l.starts_with("2024/05/20 18:00:00,VIC1,"))
        .unwrap();
    assert!(vic.ends_with(",41.0"), "snapshot price is the fallback: {vic}");
}

#[test]
fn test_aborted_interval_keeps_its_objective_row() {
    let snapshots = tempdir().unwrap();
    let out = tempdir().unwrap();
    let plan = IntervalScheduler::standard()
        .plan(ProcessKind::P5Min, start())
        .unwrap();
    populate(snapshots.path(), plan.times(), Some(2));

    let loader = Arc::new(DirectorySnapshotLoader::open(snapshots.path()).unwrap());
    let outcome = Cascade::new(
        plan,
        loader.clone(),
        config("abort", false).cascade_config().unwrap(),
        CarriedState::default(),
    )
    .run()
    .unwrap();
    assert_eq!(outcome.records().len(), 3);

    let prices = RecordedPrices::collect(loader.as_ref(), &outcome);
    let paths = write_outcome(out.path(), &outcome, &prices).unwrap();
    let objective = lines(&paths.objective);
    assert_eq!(objective.len(), 4);
    assert_eq!(
        objective[3],
        "2024/05/20 18:10:00,p5min,2,failed,,250000.0"
    );
    assert_eq!(lines(&paths.regions).len(), 5);
}

#[test]
fn test_run_without_interconnectors_writes_headers() {
    let out = tempdir().unwrap();
    let snapshots = tempdir().unwrap();
    let plan = IntervalScheduler::standard()
        .plan(ProcessKind::Dispatch, start())
        .unwrap();
    write_snapshot(
        snapshots.path(),
        &MarketSnapshot::new(
            start(),
            vec![RegionSnapshot::new("TAS1", 900.0).with_offer(Offer::new(15.0, 1_500.0))],
            vec![],
        ),
    )
    .unwrap();
    let loader = Arc::new(DirectorySnapshotLoader::open(snapshots.path()).unwrap());
    let outcome = Cascade::new(
        plan,
        loader.clone(),
        config("hold-last-state", true).cascade_config().unwrap(),
        CarriedState::default(),
    )
    .run()
    .unwrap();

    let paths = write_outcome(
        out.path(),
        &outcome,
        &RecordedPrices::collect(loader.as_ref(), &outcome),
    )
    .unwrap();
    assert_eq!(lines(&paths.interconnectors).len(), 1);
    assert_eq!(lines(&paths.regions).len(), 2);
}
