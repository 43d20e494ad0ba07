use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use proptest::prelude::*;

use stockroll::{
    partition_windows, windows_are_contiguous, DateRange, DeltaKind, InMemoryInventorySource,
    InMemoryRecordSink, InwardFallback, ItemId, KeyframeSchedule, LocationId,
    ReconstructionEngine, ReconstructionResult, ReconstructionRuntime, RecordSink, RunConfig,
    RunContext, Snapshot, StaticCatalog, TransactionDelta,
};

const HORIZON_DAYS: u64 = 40;

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(offset)
}

fn kind_strategy() -> impl Strategy<Value = DeltaKind> {
    prop_oneof![
        Just(DeltaKind::Sale),
        Just(DeltaKind::Return),
        Just(DeltaKind::Inward),
        Just(DeltaKind::Outward),
    ]
}

fn estimating(config: &mut RunConfig) {
    config.inward_fallback = InwardFallback::EstimateFromSales;
}

fn delta_strategy(kinds: BoxedStrategy<DeltaKind>) -> impl Strategy<Value = (u64, DeltaKind, i64)> {
    (0..HORIZON_DAYS, kinds, 0i64..20)
}

fn reconstruct(
    snapshots: &[(u64, i64)],
    deltas: &[(u64, DeltaKind, i64)],
    configure: impl FnOnce(&mut RunConfig),
) -> ReconstructionResult {
    let source = InMemoryInventorySource::new();
    for (offset, quantity) in snapshots {
        source
            .insert_snapshot(Snapshot::new("1", "A", day(*offset), *quantity))
            .unwrap();
    }
    for (offset, kind, quantity) in deltas {
        source
            .insert_delta(TransactionDelta::new("1", "A", day(*offset), *kind, *quantity))
            .unwrap();
    }
    let mut config = RunConfig::for_horizon(day(0), day(HORIZON_DAYS - 1));
    config.keyframes = KeyframeSchedule::EveryDays(1);
    config.workers = 1;
    configure(&mut config);

    let ctx = RunContext::new(
        config,
        Arc::new(source),
        Arc::new(StaticCatalog::new()),
        Arc::new(InMemoryRecordSink::new()) as Arc<dyn RecordSink>,
    )
    .unwrap();
    ReconstructionRuntime::new(ReconstructionEngine::new(ctx))
        .run()
        .unwrap()
        .result
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn windows_tile_from_first_snapshot_to_horizon_end(
        offsets in prop::collection::vec(0u64..60, 1..12),
        tail in 0u64..30,
    ) {
        let dates: Vec<NaiveDate> = offsets.iter().map(|o| day(*o)).collect();
        let first = *dates.iter().min().unwrap();
        let last = *dates.iter().max().unwrap();
        let end = last + Days::new(tail);

        let windows = partition_windows(
            &LocationId::from("1"),
            &dates,
            DateRange::new(first, end).unwrap(),
        )
        .unwrap();

        let distinct: BTreeSet<NaiveDate> = dates.iter().copied().collect();
        prop_assert_eq!(windows.len(), distinct.len());
        prop_assert_eq!(windows[0].start, first);
        prop_assert!(windows_are_contiguous(&windows, end));
        prop_assert!(windows.iter().all(|w| distinct.contains(&w.start)));
    }

    #[test]
    fn live_iff_positive_on_every_day(
        opening in 0i64..30,
        deltas in prop::collection::vec(delta_strategy(kind_strategy().boxed()), 0..40),
    ) {
        let result = reconstruct(&[(0, opening)], &deltas, estimating);
        let (item, loc) = (ItemId::from("A"), LocationId::from("1"));
        for offset in 0..HORIZON_DAYS {
            let quantity = result.quantity(&item, day(offset), &loc);
            prop_assert!(quantity.is_some(), "checkpoint missing on day {}", offset);
            let quantity = quantity.unwrap_or_default();
            prop_assert!(quantity >= 0);
            prop_assert_eq!(result.is_live(&item, day(offset), &loc), quantity > 0);
        }
    }

    #[test]
    fn live_iff_positive_with_default_config(
        opening in 0i64..30,
        deltas in prop::collection::vec(delta_strategy(kind_strategy().boxed()), 0..40),
    ) {
        let result = reconstruct(&[(0, opening)], &deltas, |_| {});
        let (item, loc) = (ItemId::from("A"), LocationId::from("1"));
        for offset in 0..HORIZON_DAYS {
            let quantity = result.quantity(&item, day(offset), &loc).unwrap_or_default();
            prop_assert_eq!(result.is_live(&item, day(offset), &loc), quantity > 0);
        }
    }

    #[test]
    fn sales_only_stock_never_rises(
        opening in 0i64..50,
        deltas in prop::collection::vec(delta_strategy(Just(DeltaKind::Sale).boxed()), 0..30),
    ) {
        // Default run config: no receipts are estimated.
        let result = reconstruct(&[(0, opening)], &deltas, |_| {});
        let (item, loc) = (ItemId::from("A"), LocationId::from("1"));
        let quantities: Vec<i64> = (0..HORIZON_DAYS)
            .map(|o| result.quantity(&item, day(o), &loc).unwrap_or_default())
            .collect();
        prop_assert!(quantities.windows(2).all(|pair| pair[1] <= pair[0]));
    }

    #[test]
    fn quantity_holds_without_activity(
        opening in 0i64..30,
        anchor in 0u64..HORIZON_DAYS,
    ) {
        let mut snapshots = vec![(0, opening)];
        if anchor > 0 {
            snapshots.push((anchor, opening));
        }
        let result = reconstruct(&snapshots, &[], estimating);
        let (item, loc) = (ItemId::from("A"), LocationId::from("1"));
        for offset in 0..HORIZON_DAYS {
            prop_assert_eq!(result.quantity(&item, day(offset), &loc), Some(opening));
            prop_assert_eq!(result.is_live(&item, day(offset), &loc), opening > 0);
        }
    }

    #[test]
    fn identical_inputs_give_identical_records(
        snapshots in prop::collection::btree_map(0u64..HORIZON_DAYS, 0i64..30, 1..4),
        deltas in prop::collection::vec(delta_strategy(kind_strategy().boxed()), 0..40),
    ) {
        let mut snapshots: Vec<(u64, i64)> = snapshots.into_iter().collect();
        snapshots.push((0, 5));
        snapshots.sort_unstable();
        snapshots.dedup_by_key(|(offset, _)| *offset);

        let first = reconstruct(&snapshots, &deltas, estimating);
        let second = reconstruct(&snapshots, &deltas, estimating);
        prop_assert_eq!(first.live_day_records(), second.live_day_records());
        prop_assert_eq!(first.checkpoint_records(), second.checkpoint_records());
        prop_assert_eq!(first.digest(), second.digest());
    }
}
