//! Selects due partitions under each table's in-flight cap and builds their
//! erase requests.

use std::collections::BTreeMap;

use catalog::{
    Catalog,
    ScheduleWrite,
    ShardInfo,
    TableShardInfo,
};
use common::{
    runtime::UnixTimestamp,
    types::{
        PathId,
        ShardIdx,
        TabletId,
    },
};

use crate::{
    index_mapper::make_indexes,
    types::{
        EraseLimits,
        EraseRequest,
        Expiration,
        IndexDescriptor,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunScope {
    All,
    Table(PathId),
}

/// Result of one dispatch pass, applied by the driver after commit.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub writes: Vec<ScheduleWrite>,
    pub requests: BTreeMap<TabletId, EraseRequest>,
    pub abandoned: usize,
    pub skipped_tables: usize,
}

pub fn run_due(
    catalog: &mut Catalog,
    scope: RunScope,
    now: UnixTimestamp,
    erase_enabled: bool,
) -> anyhow::Result<DispatchOutcome> {
    let coordinator = catalog.owner_id();
    let mut outcome = DispatchOutcome::default();
    if !erase_enabled {
        tracing::info!(
            "Conditional erase operations are not allowed, skip dispatch, at coordinator: \
             {coordinator}"
        );
        return Ok(outcome);
    }
    let tables: Vec<PathId> = match scope {
        RunScope::All => catalog.ttl_enabled_tables().collect(),
        RunScope::Table(table_id) => vec![table_id],
    };
    for table_id in tables {
        run_due_on_table(catalog, table_id, now, &mut outcome)?;
    }
    Ok(outcome)
}

fn run_due_on_table(
    catalog: &mut Catalog,
    table_id: PathId,
    now: UnixTimestamp,
    outcome: &mut DispatchOutcome,
) -> anyhow::Result<()> {
    let coordinator = catalog.owner_id();
    let Some(table) = catalog.table(table_id) else {
        tracing::warn!("Unable to resolve table {table_id}, at coordinator: {coordinator}");
        return Ok(());
    };
    let Some(ttl) = table.ttl() else {
        tracing::error!("TTL is not enabled for table {table_id}, at coordinator: {coordinator}");
        return Ok(());
    };
    let max_in_flight = ttl.settings().sys.max_shards_in_flight as usize;

    // An in-flight shard whose target is gone will never answer; put it back
    // in line so it stops holding a slot. It is not sent again.
    let abandoned: Vec<ShardIdx> = ttl
        .in_flight()
        .iter()
        .copied()
        .filter(|shard_idx| resolve_shard(catalog, *shard_idx).is_none())
        .collect();
    let mut dirty = !abandoned.is_empty();
    let Some(table) = catalog.table_mut(table_id) else {
        return Ok(());
    };
    for shard_idx in &abandoned {
        table.reschedule_cond_erase(*shard_idx)?;
    }
    outcome.abandoned += abandoned.len();

    let mut indexes: Option<Vec<IndexDescriptor>> = None;
    loop {
        let Some(table) = catalog.table(table_id) else {
            break;
        };
        if max_in_flight > 0 && table.in_flight_count() >= max_in_flight {
            break;
        }
        let Some(partition) = table.scheduled_cond_erase_shard().cloned() else {
            break;
        };
        if !is_due(&partition, now, coordinator) {
            break;
        }
        let Some(shard) = resolve_shard(catalog, partition.shard_idx) else {
            break;
        };
        if indexes.is_none() {
            match make_indexes(catalog, shard.path_id) {
                Ok(i) => indexes = Some(i),
                Err(e) => {
                    tracing::error!(
                        "Unable to map indexes of table {table_id}, skipping: {e:#}, at \
                         coordinator: {coordinator}"
                    );
                    outcome.skipped_tables += 1;
                    break;
                },
            }
        }
        let request = build_request(catalog, shard.path_id, now, indexes.clone().unwrap_or_default())?;
        outcome.requests.insert(shard.tablet_id, request);
        if let Some(table) = catalog.table_mut(table_id) {
            table.add_in_flight_cond_erase(partition.shard_idx)?;
        }
        dirty = true;
    }

    if dirty && let Some(table) = catalog.table(table_id) {
        outcome
            .writes
            .extend(table.ttl_record(table_id).map(ScheduleWrite::Table));
    }
    Ok(())
}

fn is_due(partition: &TableShardInfo, now: UnixTimestamp, coordinator: u64) -> bool {
    if partition.next_cond_erase > now {
        tracing::debug!(
            "Skip conditional erase: shardIdx: {}, run at: {:?}, at coordinator: {coordinator}",
            partition.shard_idx,
            partition.next_cond_erase
        );
        return false;
    }
    true
}

/// The shard's info, provided its owning table path exists, is live and has
/// a table record.
fn resolve_shard(catalog: &Catalog, shard_idx: ShardIdx) -> Option<ShardInfo> {
    let coordinator = catalog.owner_id();
    let Some(shard) = catalog.shard(shard_idx).copied() else {
        tracing::warn!(
            "Unable to resolve shard info: shardIdx: {shard_idx}, at coordinator: {coordinator}"
        );
        return None;
    };
    let Some(path) = catalog.path(shard.path_id) else {
        tracing::error!(
            "Unable to resolve path: shardIdx: {shard_idx}, pathId: {}, at coordinator: \
             {coordinator}",
            shard.path_id
        );
        return None;
    };
    if path.dropped() {
        tracing::warn!(
            "Table is dropped: shardIdx: {shard_idx}, pathId: {}, at coordinator: {coordinator}",
            shard.path_id
        );
        return None;
    }
    if catalog.table(shard.path_id).is_none() {
        tracing::warn!(
            "Unable to resolve table: shardIdx: {shard_idx}, pathId: {}, at coordinator: \
             {coordinator}",
            shard.path_id
        );
        return None;
    }
    Some(shard)
}

fn build_request(
    catalog: &Catalog,
    table_id: PathId,
    now: UnixTimestamp,
    indexes: Vec<IndexDescriptor>,
) -> anyhow::Result<EraseRequest> {
    let table = catalog
        .table(table_id)
        .ok_or_else(|| anyhow::anyhow!("Table {table_id} disappeared"))?;
    let ttl = table
        .ttl()
        .ok_or_else(|| anyhow::anyhow!("TTL is not enabled for {table_id}"))?;
    let settings = ttl.settings();
    Ok(EraseRequest {
        table_id,
        schema_version: table.alter_version,
        indexes,
        expiration: Expiration {
            column_id: ttl.column_id(),
            wall_clock_cutoff: now.saturating_sub(settings.expire_after),
            unit: settings.column_unit,
        },
        limits: EraseLimits {
            batch_max_bytes: settings.sys.batch_max_bytes,
            batch_min_keys: settings.sys.batch_min_keys,
            batch_max_keys: settings.sys.batch_max_keys,
        },
    })
}
