//! Durable form of the erase schedule. The storage engine persists these
//! records transactionally; `Catalog::restore_schedule` rebuilds the
//! in-memory schedule from them after a restart.

use std::collections::BTreeSet;

use common::{
    runtime::UnixTimestamp,
    types::{
        PathId,
        ShardIdx,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::ttl::TtlSettings;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionScheduleRecord {
    pub table_id: PathId,
    pub shard_idx: ShardIdx,
    /// Milliseconds since the unix epoch.
    pub next_eligible: UnixTimestamp,
    pub last_lag_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTtlRecord {
    pub table_id: PathId,
    pub settings: TtlSettings,
    pub in_flight: BTreeSet<ShardIdx>,
}

/// One mutation of the durable schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleWrite {
    Partition(PartitionScheduleRecord),
    DeletePartition { table_id: PathId, shard_idx: ShardIdx },
    Table(TableTtlRecord),
    DeleteTable { table_id: PathId },
}

/// Everything the storage engine holds for the erase schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub tables: Vec<TableTtlRecord>,
    pub partitions: Vec<PartitionScheduleRecord>,
}

impl ScheduleSnapshot {
    /// Apply committed writes in order, replacing records with the same key.
    pub fn apply(&mut self, writes: impl IntoIterator<Item = ScheduleWrite>) {
        for write in writes {
            match write {
                ScheduleWrite::Partition(record) => {
                    self.partitions.retain(|r| {
                        (r.table_id, r.shard_idx) != (record.table_id, record.shard_idx)
                    });
                    self.partitions.push(record);
                },
                ScheduleWrite::DeletePartition {
                    table_id,
                    shard_idx,
                } => {
                    self.partitions
                        .retain(|r| (r.table_id, r.shard_idx) != (table_id, shard_idx));
                },
                ScheduleWrite::Table(record) => {
                    self.tables.retain(|r| r.table_id != record.table_id);
                    self.tables.push(record);
                },
                ScheduleWrite::DeleteTable { table_id } => {
                    self.tables.retain(|r| r.table_id != table_id);
                },
            }
        }
    }
}
