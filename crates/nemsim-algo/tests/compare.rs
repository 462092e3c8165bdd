//! Comparison against recorded outcomes

use std::sync::Arc;

use chrono::NaiveDateTime;
use nemsim_algo::{
    Cascade, CascadeConfig, CascadeOutcome, ComparisonSubject, FailurePolicy, IntervalScheduler,
    LpSolverKind, RecordedPrices, ResultComparator,
};
use nemsim_core::{
    CarriedState, InMemorySnapshotStore, MarketSnapshot, Offer, PriceKind, PriceSeries,
    ProcessKind, RegionId, RegionSnapshot,
};

fn at() -> NaiveDateTime {
    "2024-01-01T04:05:00".parse().unwrap()
}

/// 300 MW of demand met by a single band; the record says `recorded_generation`.
fn snapshot(recorded_generation: f64) -> MarketSnapshot {
    MarketSnapshot::new(
        at(),
        vec![RegionSnapshot::new("QLD1", 300.0)
            .with_offer(Offer::new(45.0, 800.0))
            .with_recorded(47.5, recorded_generation, 0.0, 0.0)],
        vec![],
    )
}

fn dispatch(store: InMemorySnapshotStore) -> (Arc<InMemorySnapshotStore>, CascadeOutcome) {
    let store = Arc::new(store);
    let plan = IntervalScheduler::standard()
        .plan(ProcessKind::Dispatch, at())
        .unwrap();
    let config = CascadeConfig::new(FailurePolicy::Abort)
        .unwrap()
        .with_solver(LpSolverKind::Microlp);
    let outcome = Cascade::new(plan, store.clone(), config, CarriedState::default())
        .run()
        .expect("dispatch run");
    (store, outcome)
}

#[test]
fn test_divergence_beyond_tolerance_warns() {
    let (_, outcome) = dispatch(InMemorySnapshotStore::new().with_snapshot(snapshot(300.002)));
    let warnings = ResultComparator::default().compare_outcome(&outcome);

    let subjects: Vec<_> = warnings.iter().map(|w| &w.subject).collect();
    assert!(subjects.contains(&&ComparisonSubject::TotalGeneration));
    assert!(subjects.contains(&&ComparisonSubject::RegionGeneration(RegionId::new("QLD1"))));
    let total = warnings
        .iter()
        .find(|w| w.subject == ComparisonSubject::TotalGeneration)
        .unwrap();
    assert!((total.difference() + 0.002).abs() < 1e-6);
    assert_eq!(total.timestamp, at());
    assert_eq!(total.interval_index, 0);
}

#[test]
fn test_divergence_within_tolerance_is_silent() {
    let (_, outcome) = dispatch(InMemorySnapshotStore::new().with_snapshot(snapshot(300.0005)));
    assert!(ResultComparator::default().compare_outcome(&outcome).is_empty());
}

#[test]
fn test_tolerance_is_configurable() {
    let (_, outcome) = dispatch(InMemorySnapshotStore::new().with_snapshot(snapshot(305.0)));
    assert!(!ResultComparator::default().compare_outcome(&outcome).is_empty());
    assert!(ResultComparator::new(10.0).compare_outcome(&outcome).is_empty());
}

#[test]
fn test_recorded_prices_prefer_published_series() {
    let region = RegionId::new("QLD1");
    let store = InMemorySnapshotStore::new()
        .with_snapshot(snapshot(300.0))
        .with_prices(
            PriceKind::Dispatch,
            at(),
            region.clone(),
            PriceSeries::new(vec![at()], vec![52.25]),
        );
    let (store, outcome) = dispatch(store);
    let prices = RecordedPrices::collect(store.as_ref(), &outcome);
    assert_eq!(prices.get(at(), &region), Some(52.25));
}

#[test]
fn test_recorded_prices_fall_back_to_snapshot() {
    let (store, outcome) = dispatch(InMemorySnapshotStore::new().with_snapshot(snapshot(300.0)));
    let prices = RecordedPrices::collect(store.as_ref(), &outcome);
    assert_eq!(prices.len(), 1);
    assert_eq!(prices.get(at(), &RegionId::new("QLD1")), Some(47.5));
}
