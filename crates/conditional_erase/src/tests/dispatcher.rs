use std::{
    collections::BTreeSet,
    time::Duration,
};

use catalog::{
    Catalog,
    ColumnUnit,
    INDEX_IMPL_TABLE_NAME,
    IndexKind,
    ScheduleWrite,
    testing::{
        TEST_OWNER_ID,
        index,
        partitions,
        shard,
        table_description,
        tablet,
        ttl_settings,
    },
};
use common::{
    runtime::UnixTimestamp,
    types::{
        ColumnId,
        PathId,
        TabletId,
    },
};
use must_let::must_let;
use pretty_assertions::assert_eq;

use super::{
    RUN_INTERVAL,
    t0,
    ttl_catalog,
};
use crate::{
    RunScope,
    run_due,
};

#[test]
fn test_dispatch_respects_in_flight_cap() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(3, 2, t0());
    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    assert_eq!(
        outcome.requests.keys().copied().collect::<Vec<_>>(),
        vec![tablet(1), tablet(2)]
    );
    let table = catalog.table(table_id).unwrap();
    assert_eq!(table.in_flight_count(), 2);
    assert!(table.is_in_flight(shard(1)));
    assert!(table.is_in_flight(shard(2)));
    assert_eq!(outcome.writes.len(), 1);
    must_let!(let ScheduleWrite::Table(record) = &outcome.writes[0]);
    assert_eq!(record.in_flight, BTreeSet::from([shard(1), shard(2)]));

    // Nothing more until a slot frees up.
    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    assert!(outcome.requests.is_empty());
    assert!(outcome.writes.is_empty());
    catalog.check_invariants()?;
    Ok(())
}

/// Dispatch every shard of a three-partition table, complete each one at the
/// given time, then cap the table at one in flight.
fn completed_at(completions: [(u64, UnixTimestamp); 3]) -> anyhow::Result<(Catalog, PathId)> {
    let (mut catalog, table_id) = ttl_catalog(3, 0, t0());
    run_due(&mut catalog, RunScope::All, t0(), true)?;
    let table = catalog.table_mut(table_id).unwrap();
    for (local_id, now) in completions {
        table.schedule_next_cond_erase(shard(local_id), now, RUN_INTERVAL)?;
    }
    let mut settings = ttl_settings();
    settings.sys.max_shards_in_flight = 1;
    catalog.alter_ttl(table_id, Some(settings), t0())?;
    Ok((catalog, table_id))
}

/// Run one pass on the table and complete whatever it sent.
fn dispatch_next(
    catalog: &mut Catalog,
    table_id: PathId,
    now: UnixTimestamp,
) -> anyhow::Result<Vec<TabletId>> {
    let outcome = run_due(catalog, RunScope::Table(table_id), now, true)?;
    let sent: Vec<_> = outcome.requests.keys().copied().collect();
    let shards: Vec<_> = sent
        .iter()
        .map(|tablet_id| catalog.shard_for_tablet(*tablet_id).unwrap())
        .collect();
    let table = catalog.table_mut(table_id).unwrap();
    for shard_idx in shards {
        table.schedule_next_cond_erase(shard_idx, now, RUN_INTERVAL)?;
    }
    Ok(sent)
}

#[test]
fn test_earliest_due_shard_dispatched_first() -> anyhow::Result<()> {
    let (mut catalog, table_id) = completed_at([
        (3, t0()),
        (1, t0() + Duration::from_secs(10)),
        (2, t0() + Duration::from_secs(20)),
    ])?;
    let now = t0() + RUN_INTERVAL * 2;
    // Shard order would pick 1; the earlier due time wins.
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(3)]);
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(1)]);
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(2)]);
    assert!(dispatch_next(&mut catalog, table_id, now)?.is_empty());
    catalog.check_invariants()?;
    Ok(())
}

#[test]
fn test_equal_due_times_dispatch_lower_shard_first() -> anyhow::Result<()> {
    let (mut catalog, table_id) = completed_at([
        (3, t0()),
        (2, t0()),
        (1, t0() + Duration::from_secs(10)),
    ])?;
    let now = t0() + RUN_INTERVAL * 2;
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(2)]);
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(3)]);
    assert_eq!(dispatch_next(&mut catalog, table_id, now)?, vec![tablet(1)]);
    Ok(())
}

#[test]
fn test_dispatch_unbounded_when_cap_is_zero() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(5, 0, t0());
    let outcome = run_due(&mut catalog, RunScope::Table(table_id), t0(), true)?;
    assert_eq!(outcome.requests.len(), 5);
    assert_eq!(catalog.table(table_id).unwrap().in_flight_count(), 5);
    assert!(catalog.table(table_id).unwrap().scheduled_cond_erase_shard().is_none());
    Ok(())
}

#[test]
fn test_dispatch_stops_at_first_partition_not_due() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(3, 0, t0());
    let outcome = run_due(
        &mut catalog,
        RunScope::All,
        t0().saturating_sub(Duration::from_secs(1)),
        true,
    )?;
    assert!(outcome.requests.is_empty());
    assert!(outcome.writes.is_empty());
    assert_eq!(catalog.table(table_id).unwrap().in_flight_count(), 0);
    Ok(())
}

#[test]
fn test_dispatch_stops_at_unresolvable_partition() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(3, 0, t0());
    catalog.forget_shard(shard(1))?;
    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    // Shard 1 is at the head of the schedule and blocks the table.
    assert!(outcome.requests.is_empty());
    assert!(outcome.writes.is_empty());
    assert_eq!(
        catalog
            .table(table_id)
            .unwrap()
            .scheduled_cond_erase_shard()
            .unwrap()
            .shard_idx,
        shard(1)
    );
    Ok(())
}

#[test]
fn test_abandoned_in_flight_shard_frees_its_slot_without_resend() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(3, 2, t0());
    run_due(&mut catalog, RunScope::All, t0(), true)?;
    catalog.forget_shard(shard(2))?;

    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    assert_eq!(outcome.abandoned, 1);
    // Shard 2 is due again at its old time, ahead of shard 3, but does not
    // resolve, so the pass stops there.
    assert!(outcome.requests.is_empty());
    assert_eq!(outcome.writes.len(), 1);
    let table = catalog.table(table_id).unwrap();
    assert!(table.is_in_flight(shard(1)));
    assert!(!table.is_in_flight(shard(2)));
    assert_eq!(
        table.ttl().unwrap().schedule().collect::<Vec<_>>(),
        vec![(t0(), shard(2)), (t0(), shard(3))]
    );
    catalog.check_invariants()?;
    Ok(())
}

#[test]
fn test_dropped_table_releases_in_flight_shards() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(2, 0, t0());
    run_due(&mut catalog, RunScope::All, t0(), true)?;
    catalog.drop_table(table_id)?;

    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    assert_eq!(outcome.abandoned, 2);
    assert!(outcome.requests.is_empty());
    assert_eq!(catalog.table(table_id).unwrap().in_flight_count(), 0);
    Ok(())
}

#[test]
fn test_dispatch_disabled_leaves_schedule_untouched() -> anyhow::Result<()> {
    let (mut catalog, table_id) = ttl_catalog(3, 0, t0());
    let before = catalog.table(table_id).unwrap().clone();
    let outcome = run_due(&mut catalog, RunScope::All, t0(), false)?;
    assert!(outcome.requests.is_empty());
    assert!(outcome.writes.is_empty());
    assert_eq!(catalog.table(table_id).unwrap(), &before);
    Ok(())
}

#[test]
fn test_request_contents() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut desc = table_description("events", partitions(1..2), Some(ttl_settings()));
    desc.indexes = vec![index("by_b", IndexKind::GlobalSync, &["b"])];
    let (table_id, _) = catalog.create_table(catalog.root(), desc, t0())?;
    let now = t0() + Duration::from_secs(7200);

    let outcome = run_due(&mut catalog, RunScope::All, now, true)?;
    let request = &outcome.requests[&tablet(1)];
    let table = catalog.table(table_id).unwrap();
    let sys = &table.ttl_settings().unwrap().sys;
    assert_eq!(request.table_id, table_id);
    assert_eq!(request.schema_version, table.alter_version);
    assert_eq!(request.expiration.column_id, ColumnId(1));
    assert_eq!(
        request.expiration.wall_clock_cutoff,
        t0() + Duration::from_secs(3600)
    );
    assert_eq!(request.expiration.unit, ColumnUnit::Auto);
    assert_eq!(request.limits.batch_max_bytes, sys.batch_max_bytes);
    assert_eq!(request.limits.batch_min_keys, sys.batch_min_keys);
    assert_eq!(request.limits.batch_max_keys, sys.batch_max_keys);

    let index_id = catalog.child(table_id, "by_b").unwrap();
    assert_eq!(request.indexes.len(), 1);
    assert_eq!(
        request.indexes[0].index_table,
        catalog.child(index_id, INDEX_IMPL_TABLE_NAME).unwrap()
    );
    Ok(())
}

#[test]
fn test_cutoff_saturates_at_epoch() -> anyhow::Result<()> {
    let early = UnixTimestamp::from_secs(10);
    let (mut catalog, _) = ttl_catalog(1, 0, early);
    let outcome = run_due(&mut catalog, RunScope::All, early, true)?;
    assert_eq!(
        outcome.requests[&tablet(1)].expiration.wall_clock_cutoff,
        UnixTimestamp::EPOCH
    );
    Ok(())
}

#[test]
fn test_unmappable_table_is_skipped_others_dispatch() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut broken = table_description("broken", partitions(1..3), Some(ttl_settings()));
    broken.indexes = vec![index("by_b", IndexKind::GlobalSync, &["b"])];
    let (broken_id, _) = catalog.create_table(catalog.root(), broken, t0())?;
    let healthy = table_description("healthy", partitions(3..5), Some(ttl_settings()));
    let (healthy_id, _) = catalog.create_table(catalog.root(), healthy, t0())?;

    let index_id = catalog.child(broken_id, "by_b").unwrap();
    let impl_id = catalog.child(index_id, INDEX_IMPL_TABLE_NAME).unwrap();
    catalog
        .table_mut(impl_id)
        .unwrap()
        .columns
        .retain(|_, c| c.name != "c");

    let outcome = run_due(&mut catalog, RunScope::All, t0(), true)?;
    assert_eq!(outcome.skipped_tables, 1);
    assert_eq!(
        outcome.requests.keys().copied().collect::<Vec<_>>(),
        vec![tablet(3), tablet(4)]
    );
    assert_eq!(catalog.table(broken_id).unwrap().in_flight_count(), 0);
    assert_eq!(catalog.table(healthy_id).unwrap().in_flight_count(), 2);
    Ok(())
}

#[test]
fn test_table_scope_only_touches_that_table() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let (first, _) = catalog.create_table(
        catalog.root(),
        table_description("first", partitions(1..3), Some(ttl_settings())),
        t0(),
    )?;
    let (second, _) = catalog.create_table(
        catalog.root(),
        table_description("second", partitions(3..5), Some(ttl_settings())),
        t0(),
    )?;
    let outcome = run_due(&mut catalog, RunScope::Table(second), t0(), true)?;
    assert_eq!(
        outcome.requests.keys().copied().collect::<Vec<_>>(),
        vec![tablet(3), tablet(4)]
    );
    assert_eq!(catalog.table(first).unwrap().in_flight_count(), 0);
    Ok(())
}

#[test]
fn test_table_without_ttl_is_ignored() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let (table_id, _) = catalog.create_table(
        catalog.root(),
        table_description("plain", partitions(1..3), None),
        t0(),
    )?;
    let outcome = run_due(&mut catalog, RunScope::Table(table_id), t0(), true)?;
    assert!(outcome.requests.is_empty());
    assert!(outcome.writes.is_empty());
    Ok(())
}
