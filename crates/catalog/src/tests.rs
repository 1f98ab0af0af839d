use std::time::Duration;

use common::{
    runtime::UnixTimestamp,
    types::ColumnId,
};
use errors::ErrorMetadataAnyhowExt;
use must_let::must_let;
use pretty_assertions::assert_eq;

use crate::{
    Catalog,
    INDEX_IMPL_TABLE_NAME,
    IndexKind,
    PathKind,
    ScheduleSnapshot,
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

fn now() -> UnixTimestamp {
    UnixTimestamp::from_secs(1_620_198_000)
}

#[test]
fn test_create_table_schedules_every_partition_now() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let desc = table_description("events", partitions(1..4), Some(ttl_settings()));
    let (table_id, writes) = catalog.create_table(catalog.root(), desc, now())?;

    assert!(catalog.is_ttl_enabled_table(table_id));
    let table = catalog.table(table_id).unwrap();
    assert_eq!(table.alter_version, 1);
    assert_eq!(table.ttl().unwrap().column_id(), ColumnId(1));
    assert_eq!(
        table.ttl().unwrap().schedule().collect::<Vec<_>>(),
        vec![(now(), shard(1)), (now(), shard(2)), (now(), shard(3))]
    );
    assert_eq!(table.in_flight_count(), 0);
    catalog.check_invariants()?;

    // One table record and one record per partition.
    assert_eq!(writes.len(), 4);
    must_let!(let ScheduleWrite::Table(record) = &writes[0]);
    assert_eq!(record.table_id, table_id);
    assert!(record.in_flight.is_empty());

    assert_eq!(catalog.shard_for_tablet(tablet(2)), Some(shard(2)));
    assert_eq!(catalog.shard(shard(2)).unwrap().path_id, table_id);
    Ok(())
}

#[test]
fn test_create_table_builds_index_subtree() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut desc = table_description("events", partitions(1..2), None);
    desc.indexes = vec![index("by_ab", IndexKind::GlobalSync, &["a", "b"])];
    let (table_id, writes) = catalog.create_table(catalog.root(), desc, now())?;
    assert!(writes.is_empty());
    assert!(!catalog.is_ttl_enabled_table(table_id));

    let index_id = catalog.child(table_id, "by_ab").unwrap();
    assert_eq!(catalog.path(index_id).unwrap().kind, PathKind::TableIndex);
    assert_eq!(catalog.index(index_id).unwrap().keys, vec!["a", "b"]);

    let impl_id = catalog.child(index_id, INDEX_IMPL_TABLE_NAME).unwrap();
    let impl_table = catalog.table(impl_id).unwrap();
    let impl_columns: Vec<_> = impl_table
        .columns
        .values()
        .map(|c| (c.id, c.name.as_str()))
        .collect();
    assert_eq!(
        impl_columns,
        vec![(ColumnId(1), "a"), (ColumnId(2), "b"), (ColumnId(3), "c")]
    );
    Ok(())
}

#[test]
fn test_create_table_validation() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    catalog.create_table(
        catalog.root(),
        table_description("events", partitions(1..3), None),
        now(),
    )?;

    let err = catalog
        .create_table(
            catalog.root(),
            table_description("events", partitions(5..6), None),
            now(),
        )
        .unwrap_err();
    assert_eq!(err.short_msg(), "PathExists");

    let err = catalog
        .create_table(
            catalog.root(),
            table_description("other", partitions(2..4), None),
            now(),
        )
        .unwrap_err();
    assert_eq!(err.short_msg(), "ShardInUse");

    let mut desc = table_description("other", partitions(5..6), None);
    desc.key_columns = vec!["missing".to_owned()];
    let err = catalog.create_table(catalog.root(), desc, now()).unwrap_err();
    assert!(err.is_bad_request());
    assert_eq!(err.short_msg(), "InvalidKeyColumn");

    let mut desc = table_description("other", partitions(5..6), None);
    desc.indexes = vec![index("bad", IndexKind::GlobalSync, &["zzz"])];
    let err = catalog.create_table(catalog.root(), desc, now()).unwrap_err();
    assert_eq!(err.short_msg(), "InvalidIndexKeys");

    let mut ttl = ttl_settings();
    ttl.column_name = "payload".to_owned();
    let desc = table_description("other", partitions(5..6), Some(ttl));
    let err = catalog.create_table(catalog.root(), desc, now()).unwrap_err();
    assert_eq!(err.short_msg(), "InvalidTtlColumnType");

    let missing = common::types::PathId::new(TEST_OWNER_ID, 999);
    let err = catalog
        .create_table(missing, table_description("x", partitions(5..6), None), now())
        .unwrap_err();
    assert!(err.is_not_found());

    // Failed attempts leave nothing behind.
    assert!(catalog.shard(shard(5)).is_none());
    catalog.check_invariants()?;
    Ok(())
}

#[test]
fn test_schedule_transitions() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let desc = table_description("events", partitions(1..3), Some(ttl_settings()));
    let (table_id, _) = catalog.create_table(catalog.root(), desc, now())?;
    let table = catalog.table_mut(table_id).unwrap();

    assert_eq!(table.scheduled_cond_erase_shard().unwrap().shard_idx, shard(1));
    table.add_in_flight_cond_erase(shard(1))?;
    assert!(table.is_in_flight(shard(1)));
    assert_eq!(table.scheduled_cond_erase_shard().unwrap().shard_idx, shard(2));
    table.check_invariants()?;

    // Only scheduled shards may be dispatched, only in-flight ones completed.
    assert!(table.add_in_flight_cond_erase(shard(1)).is_err());
    assert!(table.reschedule_cond_erase(shard(2)).is_err());

    let later = now() + Duration::from_secs(90);
    table.schedule_next_cond_erase(shard(1), later, Duration::from_secs(3600))?;
    let partition = table.partition(shard(1)).unwrap();
    assert_eq!(partition.next_cond_erase, later + Duration::from_secs(3600));
    assert_eq!(partition.last_cond_erase_lag, Some(Duration::from_secs(90)));
    assert!(!table.is_in_flight(shard(1)));
    table.check_invariants()?;

    table.add_in_flight_cond_erase(shard(2))?;
    table.reschedule_cond_erase(shard(2))?;
    // Rescheduled at its old due time, so it is first in line again.
    assert_eq!(table.scheduled_cond_erase_shard().unwrap().shard_idx, shard(2));
    assert_eq!(table.partition(shard(2)).unwrap().next_cond_erase, now());
    table.check_invariants()?;
    Ok(())
}

#[test]
fn test_alter_ttl_lifecycle() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let desc = table_description("events", partitions(1..3), None);
    let (table_id, _) = catalog.create_table(catalog.root(), desc, now())?;

    // Enable: everything due now.
    let writes = catalog.alter_ttl(table_id, Some(ttl_settings()), now())?;
    assert_eq!(writes.len(), 3);
    assert!(catalog.is_ttl_enabled_table(table_id));
    let table = catalog.table_mut(table_id).unwrap();
    assert_eq!(table.alter_version, 2);
    table.add_in_flight_cond_erase(shard(1))?;

    // Change: schedule and in-flight survive.
    let mut settings = ttl_settings();
    settings.sys.retry_interval = Duration::from_secs(30);
    let later = now() + Duration::from_secs(10);
    let writes = catalog.alter_ttl(table_id, Some(settings.clone()), later)?;
    must_let!(let [ScheduleWrite::Table(record)] = &writes[..]);
    assert_eq!(record.settings, settings);
    let table = catalog.table(table_id).unwrap();
    assert!(table.is_in_flight(shard(1)));
    assert_eq!(table.partition(shard(2)).unwrap().next_cond_erase, now());
    assert_eq!(table.alter_version, 3);

    // Disable: schedule gone.
    let writes = catalog.alter_ttl(table_id, None, later)?;
    assert_eq!(
        writes,
        vec![
            ScheduleWrite::DeleteTable { table_id },
            ScheduleWrite::DeletePartition {
                table_id,
                shard_idx: shard(1)
            },
            ScheduleWrite::DeletePartition {
                table_id,
                shard_idx: shard(2)
            },
        ]
    );
    assert!(!catalog.is_ttl_enabled_table(table_id));
    assert_eq!(catalog.table(table_id).unwrap().in_flight_count(), 0);
    assert!(catalog.alter_ttl(table_id, None, later)?.is_empty());
    catalog.check_invariants()?;
    Ok(())
}

#[test]
fn test_set_partitions_keeps_surviving_schedule() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let desc = table_description("events", partitions(1..4), Some(ttl_settings()));
    let (table_id, _) = catalog.create_table(catalog.root(), desc, now())?;
    let table = catalog.table_mut(table_id).unwrap();
    table.add_in_flight_cond_erase(shard(1))?;
    table.add_in_flight_cond_erase(shard(2))?;

    // Split shard 2 into 4 and 5; shard 3 is untouched.
    let later = now() + Duration::from_secs(60);
    let mut new_partitions = partitions(1..2);
    new_partitions.extend(partitions(3..6).into_iter().filter(|p| p.shard_idx != shard(3)));
    new_partitions.insert(1, partitions(3..4)[0]);
    let writes = catalog.set_partitions(table_id, new_partitions, later)?;
    assert!(writes.contains(&ScheduleWrite::DeletePartition {
        table_id,
        shard_idx: shard(2)
    }));

    let table = catalog.table(table_id).unwrap();
    assert_eq!(
        table.partitions().iter().map(|p| p.shard_idx).collect::<Vec<_>>(),
        vec![shard(1), shard(3), shard(4), shard(5)]
    );
    assert!(table.is_in_flight(shard(1)));
    assert!(!table.is_in_flight(shard(2)));
    assert_eq!(table.partition(shard(3)).unwrap().next_cond_erase, now());
    assert_eq!(table.partition(shard(4)).unwrap().next_cond_erase, later);
    assert_eq!(table.alter_version, 2);
    catalog.check_invariants()?;

    // The retired shard stays registered until its tablet is gone.
    assert!(catalog.shard(shard(2)).is_some());
    catalog.forget_shard(shard(2))?;
    assert!(catalog.shard_for_tablet(tablet(2)).is_none());
    assert!(catalog.forget_shard(shard(2)).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn test_drop_then_forget_table() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut desc = table_description("events", partitions(1..3), Some(ttl_settings()));
    desc.indexes = vec![index("by_b", IndexKind::GlobalSync, &["b"])];
    let (table_id, _) = catalog.create_table(catalog.root(), desc, now())?;
    let index_id = catalog.child(table_id, "by_b").unwrap();

    let err = catalog.forget_table(table_id).unwrap_err();
    assert_eq!(err.short_msg(), "TableNotDropped");

    catalog.drop_table(table_id)?;
    assert!(catalog.path(table_id).unwrap().dropped());
    assert!(catalog.path(index_id).unwrap().dropped());
    // Still TTL-enabled so in-flight shards get cleaned up lazily.
    assert!(catalog.is_ttl_enabled_table(table_id));
    assert!(catalog.alter_ttl(table_id, None, now()).unwrap_err().is_not_found());

    let writes = catalog.forget_table(table_id)?;
    assert_eq!(writes.len(), 3);
    assert!(catalog.path(table_id).is_none());
    assert!(catalog.path(index_id).is_none());
    assert!(catalog.table(table_id).is_none());
    assert!(catalog.child(catalog.root(), "events").is_none());
    assert!(!catalog.is_ttl_enabled_table(table_id));
    catalog.check_invariants()?;
    Ok(())
}

#[test]
fn test_restore_schedule_from_records() -> anyhow::Result<()> {
    let build = || -> anyhow::Result<(Catalog, common::types::PathId, Vec<ScheduleWrite>)> {
        let mut catalog = Catalog::new(TEST_OWNER_ID);
        let desc = table_description("events", partitions(1..4), Some(ttl_settings()));
        let (table_id, writes) = catalog.create_table(catalog.root(), desc, now())?;
        Ok((catalog, table_id, writes))
    };
    let (mut catalog, table_id, writes) = build()?;
    let mut snapshot = ScheduleSnapshot::default();
    snapshot.apply(writes);

    let later = now() + Duration::from_secs(120);
    let table = catalog.table_mut(table_id).unwrap();
    table.add_in_flight_cond_erase(shard(1))?;
    table.add_in_flight_cond_erase(shard(2))?;
    table.schedule_next_cond_erase(shard(1), later, Duration::from_secs(3600))?;
    let table = catalog.table(table_id).unwrap();
    snapshot.apply(
        table
            .partition_record(table_id, shard(1))
            .map(ScheduleWrite::Partition)
            .into_iter()
            .chain(table.ttl_record(table_id).map(ScheduleWrite::Table)),
    );

    // A fresh process: same topology, schedule from durable records only.
    let (mut restored, restored_id, _) = build()?;
    assert_eq!(restored_id, table_id);
    let snapshot: ScheduleSnapshot = serde_json::from_value(serde_json::to_value(&snapshot)?)?;
    restored.restore_schedule(snapshot)?;
    restored.check_invariants()?;

    let original = catalog.table(table_id).unwrap();
    let restored = restored.table(table_id).unwrap();
    assert_eq!(restored.partitions(), original.partitions());
    assert_eq!(restored.ttl(), original.ttl());
    assert!(restored.is_in_flight(shard(2)));
    assert_eq!(
        restored.partition(shard(1)).unwrap().last_cond_erase_lag,
        Some(Duration::from_secs(120))
    );
    Ok(())
}

#[test]
fn test_drop_index() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut desc = table_description("events", partitions(1..2), None);
    desc.indexes = vec![index("by_b", IndexKind::GlobalSync, &["b"])];
    let (table_id, _) = catalog.create_table(catalog.root(), desc, now())?;
    let index_id = catalog.child(table_id, "by_b").unwrap();
    let impl_id = catalog.child(index_id, INDEX_IMPL_TABLE_NAME).unwrap();

    catalog.drop_index(table_id, "by_b")?;
    assert!(catalog.path(index_id).unwrap().dropped());
    assert!(catalog.path(impl_id).unwrap().dropped());
    assert!(!catalog.path(table_id).unwrap().dropped());
    assert_eq!(catalog.table(table_id).unwrap().alter_version, 2);

    let err = catalog.drop_index(table_id, "by_b").unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn test_restore_is_exact_with_sub_millisecond_clock() -> anyhow::Result<()> {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let created = now() + Duration::from_nanos(1_999_999);
    let desc = table_description("events", partitions(1..3), Some(ttl_settings()));
    let (table_id, writes) = catalog.create_table(catalog.root(), desc, created)?;
    let mut snapshot = ScheduleSnapshot::default();
    snapshot.apply(writes);

    let answered = created + Duration::from_nanos(42_000_456_789);
    let table = catalog.table_mut(table_id).unwrap();
    table.add_in_flight_cond_erase(shard(1))?;
    table.schedule_next_cond_erase(shard(1), answered, Duration::from_nanos(3_600_000_250_300))?;
    let table = catalog.table(table_id).unwrap();
    snapshot.apply(
        table
            .partition_record(table_id, shard(1))
            .map(ScheduleWrite::Partition)
            .into_iter()
            .chain(table.ttl_record(table_id).map(ScheduleWrite::Table)),
    );

    let mut restored = Catalog::new(TEST_OWNER_ID);
    let desc = table_description("events", partitions(1..3), Some(ttl_settings()));
    restored.create_table(restored.root(), desc, now() + Duration::from_secs(600))?;
    let snapshot: ScheduleSnapshot = serde_json::from_value(serde_json::to_value(&snapshot)?)?;
    restored.restore_schedule(snapshot)?;

    let original = catalog.table(table_id).unwrap();
    let restored = restored.table(table_id).unwrap();
    assert_eq!(restored.partitions(), original.partitions());
    assert_eq!(restored.ttl(), original.ttl());
    assert_eq!(
        original.partition(shard(1)).unwrap().next_cond_erase,
        UnixTimestamp::from_millis(1_620_198_000_000 + 1 + 42_000 + 3_600_000)
    );
    assert_eq!(
        original.partition(shard(1)).unwrap().last_cond_erase_lag,
        Some(Duration::from_secs(42))
    );
    Ok(())
}
