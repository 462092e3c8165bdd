//! Cascade orchestration tests
//!
//! Runs multi-interval cascades over in-memory snapshots and checks the state carried
//! between intervals and between cascades.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use nemsim_algo::{
    Cascade, CascadeConfig, CascadeOutcome, CascadeState, CvpSettings, FailurePolicy,
    FormulationOptions, IntervalPlan, IntervalScheduler, IntervalStatus, LpSolverKind,
};
use nemsim_core::{
    BatteryState, CarriedState, DispatchError, InMemorySnapshotStore, MarketSnapshot, Offer,
    ProcessKind, RegionId, RegionSnapshot, SolveFailure,
};

const REGION: &str = "SA1";

fn start() -> NaiveDateTime {
    "2024-02-12T04:10:00".parse().unwrap()
}

fn plan(process: ProcessKind) -> IntervalPlan {
    IntervalScheduler::standard()
        .plan(process, start())
        .expect("plan from 04:10")
}

/// One region whose only offer band is priced by `price(index)`.
fn store(plan: &IntervalPlan, demand: f64, price: impl Fn(usize) -> f64) -> InMemorySnapshotStore {
    let mut store = InMemorySnapshotStore::new();
    for (i, ts) in plan.times().iter().enumerate() {
        store.insert_snapshot(MarketSnapshot::new(
            *ts,
            vec![RegionSnapshot::new(REGION, demand)
                .with_offer(Offer::new(price(i), 1_000.0))
                .with_recorded(price(i), demand, 0.0, 0.0)],
            vec![],
        ));
    }
    store
}

fn battery(soc: f64) -> BatteryState {
    BatteryState::new(REGION, 10.0, 50.0, 0.81)
        .expect("valid battery")
        .with_costs(0.0, 100.0)
        .with_soc(soc)
        .expect("soc within capacity")
}

fn config(policy: FailurePolicy) -> CascadeConfig {
    CascadeConfig::new(policy)
        .expect("default linearizer")
        .with_solver(LpSolverKind::Microlp)
}

fn run(
    plan: IntervalPlan,
    store: InMemorySnapshotStore,
    config: CascadeConfig,
    seed: CarriedState,
) -> CascadeOutcome {
    Cascade::new(plan, Arc::new(store), config, seed)
        .run()
        .expect("cascade should not fail fatally")
}

#[test]
fn test_battery_soc_stays_within_capacity() {
    let plan = plan(ProcessKind::P5Min);
    // cheap and expensive intervals alternate, so the battery cycles
    let store = store(&plan, 500.0, |i| if i % 2 == 0 { 10.0 } else { 300.0 });
    let outcome = run(
        plan,
        store,
        config(FailurePolicy::Abort),
        CarriedState::new(Some(battery(0.0))),
    );

    assert!(outcome.is_complete());
    let mut charged = false;
    let mut discharged = false;
    for record in outcome.records() {
        let result = record
            .solution
            .as_ref()
            .and_then(|s| s.battery.as_ref())
            .expect("every interval has a battery result");
        assert!(
            (0.0..=10.0).contains(&result.soc_mwh),
            "interval {} soc {}",
            record.index,
            result.soc_mwh
        );
        charged |= result.charge_mw > 1.0;
        discharged |= result.discharge_mw > 1.0;
    }
    assert!(charged && discharged, "battery should cycle");

    let last = outcome.records().last().unwrap();
    let last_soc = last.solution.as_ref().unwrap().battery.as_ref().unwrap().soc_mwh;
    let terminal = outcome.terminal().battery.as_ref().unwrap();
    assert_eq!(terminal.soc_mwh, last_soc);
}

#[test]
fn test_first_interval_charges_from_seed() {
    let plan = plan(ProcessKind::P5Min);
    let store = store(&plan, 500.0, |_| 10.0);
    let outcome = run(
        plan,
        store,
        config(FailurePolicy::Abort),
        CarriedState::new(Some(battery(2.0))),
    );
    let first = outcome.records()[0].solution.as_ref().unwrap();
    let result = first.battery.as_ref().unwrap();
    // 50 MW for five minutes through a 0.9 charge efficiency
    assert!((result.charge_mw - 50.0).abs() < 1e-6);
    assert!((result.soc_mwh - (2.0 + 0.9 * 50.0 / 12.0)).abs() < 1e-6);
    let terminal = outcome.terminal().battery.as_ref().unwrap();
    assert!((terminal.soc_mwh - 10.0).abs() < 1e-6, "battery ends full");
}

#[test]
fn test_predispatch_seeds_p5min() {
    let predispatch = plan(ProcessKind::Predispatch);
    let store_pd = store(&predispatch, 500.0, |i| if i < 3 { 10.0 } else { 100.0 });
    let first = run(
        predispatch,
        store_pd,
        config(FailurePolicy::Abort),
        CarriedState::new(Some(battery(0.0))),
    );
    assert!(first.is_complete());
    let seeded_soc = first.terminal().battery.as_ref().unwrap().soc_mwh;
    assert!(seeded_soc > 0.0);

    // between the charge and discharge thresholds the battery idles
    let p5min = plan(ProcessKind::P5Min);
    let store_p5 = store(&p5min, 500.0, |_| 100.0);
    let chained = Cascade::chained(&first, p5min, Arc::new(store_p5), config(FailurePolicy::Abort))
        .run()
        .expect("chained cascade");
    for record in chained.records() {
        let soc = record.solution.as_ref().unwrap().battery.as_ref().unwrap().soc_mwh;
        assert!((soc - seeded_soc).abs() < 1e-6, "interval {} soc {soc}", record.index);
    }
}

#[test]
fn test_transitions_follow_the_plan() {
    let plan = plan(ProcessKind::Dispatch);
    let store = store(&plan, 200.0, |_| 40.0);
    let outcome = run(plan, store, config(FailurePolicy::Abort), CarriedState::default());
    assert_eq!(
        outcome.transitions(),
        &[
            CascadeState::Idle,
            CascadeState::Formulating(0),
            CascadeState::Solving(0),
            CascadeState::Extracted(0),
            CascadeState::Done,
        ]
    );
}

fn infeasible_at(plan: &IntervalPlan, bad: usize) -> InMemorySnapshotStore {
    let mut store = store(plan, 500.0, |_| 40.0);
    let ts = plan.times()[bad];
    store.insert_snapshot(MarketSnapshot::new(
        ts,
        vec![RegionSnapshot::new(REGION, 5_000.0).with_offer(Offer::new(40.0, 1_000.0))],
        vec![],
    ));
    store
}

fn hard_constraints(policy: FailurePolicy) -> CascadeConfig {
    config(policy).with_formulation(FormulationOptions {
        cvp: CvpSettings::disabled(),
        ..FormulationOptions::default()
    })
}

#[test]
fn test_abort_stops_at_failed_interval() {
    let plan = plan(ProcessKind::P5Min);
    let store = infeasible_at(&plan, 3);
    let outcome = run(plan, store, hard_constraints(FailurePolicy::Abort), CarriedState::default());

    assert_eq!(outcome.records().len(), 4);
    assert!(!outcome.is_complete());
    let (record, failure) = outcome.failures().next().expect("one failure");
    assert_eq!(record.index, 3);
    assert!(matches!(failure, SolveFailure::Infeasible(_)));
    assert_eq!(outcome.transitions().last(), Some(&CascadeState::Done));
    assert!(!outcome.transitions().contains(&CascadeState::Formulating(4)));
}

#[test]
fn test_hold_last_state_repeats_previous_solution() {
    let plan = plan(ProcessKind::P5Min);
    let store = infeasible_at(&plan, 3);
    let outcome = run(
        plan,
        store,
        hard_constraints(FailurePolicy::HoldLastState),
        CarriedState::default(),
    );

    assert!(outcome.is_complete());
    assert_eq!(outcome.records().len(), 12);
    let held = &outcome.records()[3];
    assert!(matches!(held.status, IntervalStatus::Held(SolveFailure::Infeasible(_))));
    let previous = outcome.records()[2].solution.as_ref().unwrap();
    let repeated = held.solution.as_ref().expect("held interval repeats a solution");
    assert_eq!(repeated.timestamp, held.timestamp);
    assert_eq!(repeated.regions, previous.regions);
    assert_eq!(outcome.records()[4].status, IntervalStatus::Solved);
}

#[test]
fn test_ramp_baseline_carries_between_dispatch_intervals() {
    let plan = plan(ProcessKind::P5Min);
    let mut store = InMemorySnapshotStore::new();
    for ts in plan.times() {
        store.insert_snapshot(MarketSnapshot::new(
            *ts,
            vec![
                RegionSnapshot::new(REGION, 800.0)
                    .with_offer(Offer::new(30.0, 1_000.0))
                    .with_ramp(500.0, 10.0, 10.0),
            ],
            vec![],
        ));
    }
    let outcome = run(plan, store, config(FailurePolicy::Abort), CarriedState::default());

    // the lead interval is ramp limited to 500 + 10 × 5 and sheds the rest
    let first = &outcome.records()[0].solution.as_ref().unwrap().regions[0];
    assert!((first.generation_mw - 550.0).abs() < 1e-6, "generation {}", first.generation_mw);
    assert!((first.deficit_mw - 250.0).abs() < 1e-6);
    // later p5min intervals are not ramp constrained
    let second = &outcome.records()[1].solution.as_ref().unwrap().regions[0];
    assert!((second.generation_mw - 800.0).abs() < 1e-6);
    assert_eq!(
        outcome.terminal().generation(&RegionId::new(REGION)),
        Some(second.generation_mw)
    );
}

#[test]
fn test_zero_deadline_times_out() {
    let plan = plan(ProcessKind::Dispatch);
    let store = store(&plan, 200.0, |_| 40.0);
    let outcome = run(
        plan,
        store,
        config(FailurePolicy::Abort).with_timeout(Some(Duration::ZERO)),
        CarriedState::default(),
    );
    assert!(matches!(
        outcome.records()[0].status,
        IntervalStatus::Failed(SolveFailure::Timeout { .. })
    ));
}

#[test]
fn test_cancellation_aborts_even_when_holding() {
    let plan = plan(ProcessKind::P5Min);
    let store = store(&plan, 200.0, |_| 40.0);
    let cascade = Cascade::new(
        plan,
        Arc::new(store),
        config(FailurePolicy::HoldLastState),
        CarriedState::default(),
    );
    cascade.cancellation_token().cancel();
    let outcome = cascade.run().expect("cancelled run still returns an outcome");

    assert_eq!(outcome.records().len(), 1);
    assert_eq!(
        outcome.records()[0].status,
        IntervalStatus::Failed(SolveFailure::Cancelled)
    );
    assert!(!outcome.is_complete());
}

#[test]
fn test_missing_snapshot_is_fatal_with_context() {
    let plan = plan(ProcessKind::P5Min);
    let mut store = InMemorySnapshotStore::new();
    let first = plan.times()[0];
    store.insert_snapshot(MarketSnapshot::new(
        first,
        vec![RegionSnapshot::new(REGION, 200.0).with_offer(Offer::new(40.0, 1_000.0))],
        vec![],
    ));
    let err = Cascade::new(
        plan.clone(),
        Arc::new(store),
        config(FailurePolicy::HoldLastState),
        CarriedState::default(),
    )
    .run()
    .expect_err("second snapshot is missing");

    assert!(matches!(err, DispatchError::Snapshot { .. }), "{err}");
    let context = err.context().expect("interval context");
    assert_eq!(context.interval_index, 1);
    assert_eq!(context.timestamp, plan.times()[1]);
    assert_eq!(context.process, ProcessKind::P5Min);
}

#[test]
fn test_chained_run_ramps_from_its_own_snapshot() {
    let predispatch = plan(ProcessKind::Predispatch);
    let p5min = plan(ProcessKind::P5Min);
    let terminal = *predispatch.times().last().unwrap();
    let mut store = InMemorySnapshotStore::new();
    for ts in predispatch.times().iter().chain(p5min.times()) {
        // the next-day tail of predispatch runs far above the p5min baseline
        let demand = if *ts == terminal { 900.0 } else { 120.0 };
        store.insert_snapshot(MarketSnapshot::new(
            *ts,
            vec![RegionSnapshot::new(REGION, demand)
                .with_offer(Offer::new(30.0, 1_000.0))
                .with_ramp(100.0, 10.0, 10.0)],
            vec![],
        ));
    }
    let store = Arc::new(store);

    let seed = Cascade::new(
        predispatch,
        store.clone(),
        hard_constraints(FailurePolicy::Abort),
        CarriedState::new(Some(battery(5.0))),
    )
    .run()
    .unwrap();
    assert!(seed.is_complete());
    let tail = seed.terminal().generation(&RegionId::new(REGION)).unwrap();
    assert!(tail >= 900.0 - 1e-6, "terminal generation {tail}");

    let chained = Cascade::chained(&seed, p5min, store, hard_constraints(FailurePolicy::Abort))
        .run()
        .unwrap();
    assert!(chained.is_complete(), "{:?}", chained.records()[0].status);
    let first = &chained.records()[0].solution.as_ref().unwrap().regions[0];
    assert!(first.generation_mw <= 150.0 + 1e-6, "generation {}", first.generation_mw);
    assert_eq!(
        chained.records()[0]
            .solution
            .as_ref()
            .and_then(|s| s.battery.as_ref())
            .map(|b| b.region.clone()),
        Some(RegionId::new(REGION))
    );
}
