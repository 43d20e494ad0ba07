use std::sync::Arc;

use chrono::NaiveDate;

use stockroll::{
    ingest_rows, DateRange, DeltaKind, InMemoryInventorySource, InMemoryRecordSink,
    InwardFallback, ItemId, ItemScope, KeyframeSchedule, LocationId, NegativeStockPolicy,
    RawDeltaRow, RawSnapshotRow, ReconstructionEngine, ReconstructionResult,
    ReconstructionRuntime, RecordSink, RunConfig, RunContext, RunReport, Snapshot,
    StaticCatalog, TransactionDelta,
};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn item(id: &str) -> ItemId {
    ItemId::from(id)
}

fn loc(id: &str) -> LocationId {
    LocationId::from(id)
}

fn run_with(
    source: InMemoryInventorySource,
    catalog: StaticCatalog,
    config: RunConfig,
) -> (RunReport, Arc<InMemoryRecordSink>) {
    let sink = Arc::new(InMemoryRecordSink::new());
    let ctx = RunContext::new(
        config,
        Arc::new(source),
        Arc::new(catalog),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    )
    .unwrap();
    let report = ReconstructionRuntime::new(ReconstructionEngine::new(ctx))
        .run()
        .unwrap();
    (report, sink)
}

fn run(source: InMemoryInventorySource, config: RunConfig) -> (ReconstructionResult, RunReport) {
    let (mut report, _) = run_with(source, StaticCatalog::new(), config);
    let result = report.result.take().unwrap();
    (result, report)
}

#[test]
fn sales_roll_forward_and_clamp_at_horizon_end_with_default_config() {
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 10)).unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "A", d(2), DeltaKind::Sale, 3),
            TransactionDelta::new("1", "A", d(5), DeltaKind::Sale, 8),
        ])
        .unwrap();
    let mut config = RunConfig::for_horizon(d(1), d(6));
    config.keyframes = KeyframeSchedule::EveryDays(1);

    let (result, report) = run(source, config);
    let (a, one) = (item("A"), loc("1"));

    assert_eq!(result.quantity(&a, d(2), &one), Some(10));
    assert_eq!(result.quantity(&a, d(3), &one), Some(7));
    for day in 1..=5 {
        assert!(result.is_live(&a, d(day), &one), "day {day} should be live");
    }
    assert!(!result.is_live(&a, d(6), &one));
    assert_eq!(result.quantity(&a, d(6), &one), Some(0));
    assert_eq!(
        result.days_live(&a, &one, &DateRange::new(d(1), d(6)).unwrap()),
        5
    );
    assert!(report.is_complete());
    assert!(report.diagnostics.negative_stock.is_empty());
}

#[test]
fn clamped_day_keeps_its_true_quantity_in_the_alert() {
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 10)).unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "A", d(2), DeltaKind::Sale, 3),
            TransactionDelta::new("1", "A", d(5), DeltaKind::Sale, 8),
        ])
        .unwrap();
    let mut config = RunConfig::for_horizon(d(1), d(6));
    config.negative_stock = NegativeStockPolicy::Alert;

    let (result, report) = run(source, config);
    assert_eq!(result.quantity(&item("A"), d(6), &loc("1")), Some(0));
    let alerts = &report.diagnostics.negative_stock;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].date, d(6));
    assert_eq!(alerts[0].quantity, -1);
}

#[test]
fn estimated_inward_covers_week_without_feed() {
    // 2024-01-01 is a Monday.
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 5)).unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "A", d(3), DeltaKind::Sale, 6),
            TransactionDelta::new("1", "A", d(4), DeltaKind::Sale, 6),
        ])
        .unwrap();
    let mut config = RunConfig::for_horizon(d(1), d(7));
    config.keyframes = KeyframeSchedule::EveryDays(1);
    config.negative_stock = NegativeStockPolicy::Alert;
    config.inward_fallback = InwardFallback::EstimateFromSales;

    let (result, report) = run(source, config.clone());
    let (a, one) = (item("A"), loc("1"));
    // 5 + 7 estimated on day 3 - 6 = 6, then 6 - 6 = 0.
    assert_eq!(result.quantity(&a, d(4), &one), Some(6));
    assert_eq!(result.quantity(&a, d(5), &one), Some(0));
    assert!(report.diagnostics.negative_stock.is_empty());

    // Without the fallback the same rows drive stock negative.
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 5)).unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "A", d(3), DeltaKind::Sale, 6),
            TransactionDelta::new("1", "A", d(4), DeltaKind::Sale, 6),
        ])
        .unwrap();
    config.inward_fallback = InwardFallback::Disabled;
    let (result, report) = run(source, config);
    assert_eq!(result.quantity(&a, d(4), &one), Some(0));
    assert!(!result.is_live(&a, d(4), &one));
    assert_eq!(report.diagnostics.negative_stock.len(), 1);
    assert_eq!(report.diagnostics.negative_stock[0].date, d(4));
    assert_eq!(report.diagnostics.negative_stock[0].quantity, -1);
}

#[test]
fn item_without_activity_keeps_its_snapshot_quantity() {
    let source = InMemoryInventorySource::new();
    source
        .extend_snapshots([
            Snapshot::new("1", "A", d(3), 4),
            Snapshot::new("1", "Z", d(3), 0),
        ])
        .unwrap();
    let mut config = RunConfig::for_horizon(d(3), d(31));
    config.keyframes = KeyframeSchedule::EveryDays(1);

    let (result, _) = run(source, config);
    let one = loc("1");
    for day in 3..=31 {
        assert_eq!(result.quantity(&item("A"), d(day), &one), Some(4));
        assert!(result.is_live(&item("A"), d(day), &one));
        assert_eq!(result.quantity(&item("Z"), d(day), &one), Some(0));
        assert!(!result.is_live(&item("Z"), d(day), &one));
    }
}

#[test]
fn days_before_an_items_first_snapshot_stay_unknown() {
    let source = InMemoryInventorySource::new();
    source
        .extend_snapshots([
            Snapshot::new("1", "A", d(1), 4),
            Snapshot::new("1", "A", d(8), 4),
            Snapshot::new("1", "B", d(8), 2),
        ])
        .unwrap();
    let mut config = RunConfig::for_horizon(d(1), d(10));
    config.keyframes = KeyframeSchedule::EveryDays(1);

    let (result, report) = run(source, config);
    let (b, one) = (item("B"), loc("1"));
    for day in 1..=7 {
        assert_eq!(result.quantity(&b, d(day), &one), None);
        assert!(!result.is_live(&b, d(day), &one));
    }
    assert_eq!(result.quantity(&b, d(8), &one), Some(2));

    let missing = &report.diagnostics.missing_anchors;
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].item, Some(b));
    assert_eq!(missing[0].requested, d(1));
}

#[test]
fn location_without_snapshots_is_reported_and_skipped() {
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 4)).unwrap();
    source
        .insert_delta(TransactionDelta::new("2", "A", d(2), DeltaKind::Sale, 1))
        .unwrap();

    let (result, report) = run(source, RunConfig::for_horizon(d(1), d(5)));
    assert!(result.live_locations(&item("A"), d(2)).is_some_and(|l| !l.contains(&loc("2"))));
    assert!(report
        .diagnostics
        .missing_anchors
        .iter()
        .any(|m| m.location == loc("2") && m.item.is_none()));
    assert_eq!(report.diagnostics.orphan_deltas.len(), 1);
    assert_eq!(report.diagnostics.orphan_deltas[0].location, loc("2"));
}

#[test]
fn orphan_deltas_are_ignored() {
    let source = InMemoryInventorySource::new();
    source.insert_snapshot(Snapshot::new("1", "A", d(1), 4)).unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "Q", d(2), DeltaKind::Inward, 10),
            TransactionDelta::new("1", "Q", d(3), DeltaKind::Sale, 1),
        ])
        .unwrap();

    let (result, report) = run(source, RunConfig::for_horizon(d(1), d(5)));
    assert_eq!(result.live_locations(&item("Q"), d(4)), None);
    assert_eq!(report.diagnostics.orphan_deltas.len(), 1);
    assert_eq!(report.diagnostics.orphan_deltas[0].rows, 2);
}

#[test]
fn child_items_roll_up_into_their_parent() {
    let source = InMemoryInventorySource::new();
    source
        .extend_snapshots([
            Snapshot::new("1", "shirt-s", d(1), 1),
            Snapshot::new("1", "shirt-m", d(1), 1),
            Snapshot::new("1", "socks", d(1), 9),
        ])
        .unwrap();
    source
        .extend_deltas([
            TransactionDelta::new("1", "shirt-s", d(2), DeltaKind::Sale, 1),
            TransactionDelta::new("1", "shirt-m", d(3), DeltaKind::Sale, 1),
        ])
        .unwrap();
    let catalog = StaticCatalog::new()
        .with_parents([("shirt-s", "shirt"), ("shirt-m", "shirt")])
        .with_scope(ItemScope::matching("^shirt").unwrap());
    let mut config = RunConfig::for_horizon(d(1), d(5));
    config.keyframes = KeyframeSchedule::EveryDays(1);

    let (mut report, _) = run_with(source, catalog, config);
    let result = report.result.take().unwrap();
    let (shirt, one) = (item("shirt"), loc("1"));

    assert_eq!(result.quantity(&shirt, d(3), &one), Some(1));
    assert_eq!(result.quantity(&shirt, d(4), &one), Some(0));
    assert_eq!(result.live_locations(&item("shirt-s"), d(1)), None);
    assert_eq!(result.live_locations(&item("socks"), d(1)), None);
}

#[test]
fn ingested_rows_reconstruct_like_typed_rows() {
    let source = InMemoryInventorySource::new();
    let snapshots = vec![RawSnapshotRow {
        location: "1".to_string(),
        item: "A".to_string(),
        as_of_date: "2024-01-01".to_string(),
        quantity: 10,
    }];
    let delta = |date: &str, kind: &str, quantity| RawDeltaRow {
        location: "1".to_string(),
        item: "A".to_string(),
        date: date.to_string(),
        kind: kind.to_string(),
        quantity,
    };
    let deltas = vec![
        delta("2024-01-02", "sale", 3),
        delta("2024-01-05", "sales", 8),
        delta("2024-13-01", "sale", 100),
        delta("2024-01-03", "sale", -4),
    ];
    let ingest = ingest_rows(&source, &snapshots, &deltas, Some(d(6)));
    assert_eq!(ingest.deltas_accepted, 2);
    assert_eq!(ingest.rejected.len(), 2);

    let (result, _) = run(source, RunConfig::for_horizon(d(1), d(6)));
    assert_eq!(result.days_live(&item("A"), &loc("1"), &DateRange::new(d(1), d(6)).unwrap()), 5);
}

#[test]
fn sink_receives_the_same_records_as_the_result() {
    let source = InMemoryInventorySource::new();
    source
        .extend_snapshots([
            Snapshot::new("1", "A", d(1), 2),
            Snapshot::new("2", "A", d(1), 1),
            Snapshot::new("2", "B", d(4), 3),
        ])
        .unwrap();
    source
        .insert_delta(TransactionDelta::new("1", "A", d(2), DeltaKind::Outward, 2))
        .unwrap();
    let mut config = RunConfig::for_horizon(d(1), d(9));
    config.keyframes = KeyframeSchedule::WeekStart;

    let (report, sink) = run_with(source, StaticCatalog::new(), config);
    let result = report.result.unwrap();
    assert_eq!(sink.live_days().unwrap(), result.live_day_records());
    assert_eq!(sink.checkpoints().unwrap(), result.checkpoint_records());
    // Mondays 1 and 8 plus the horizon end.
    let dates: std::collections::BTreeSet<_> =
        result.checkpoint_records().iter().map(|r| r.date).collect();
    assert_eq!(dates.into_iter().collect::<Vec<_>>(), vec![d(1), d(8), d(9)]);
}
