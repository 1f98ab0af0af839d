use std::{
    collections::BTreeMap,
    time::Duration,
};

use common::{
    runtime::UnixTimestamp,
    types::{
        ColumnId,
        PathId,
        ShardIdx,
    },
};

use crate::{
    records::{
        PartitionScheduleRecord,
        TableTtlRecord,
    },
    ttl::{
        TtlSettings,
        TtlState,
    },
    types::{
        ColumnInfo,
        TableShardInfo,
    },
};

#[derive(Clone, Debug, PartialEq)]
pub struct TableInfo {
    pub columns: BTreeMap<ColumnId, ColumnInfo>,
    pub key_column_ids: Vec<ColumnId>,
    /// Schema version, bumped on every alteration.
    pub alter_version: u64,
    pub(crate) partitions: Vec<TableShardInfo>,
    pub(crate) shard_to_partition: BTreeMap<ShardIdx, usize>,
    pub(crate) ttl: Option<TtlState>,
}

impl TableInfo {
    pub(crate) fn new(columns: BTreeMap<ColumnId, ColumnInfo>, key_column_ids: Vec<ColumnId>) -> Self {
        Self {
            columns,
            key_column_ids,
            alter_version: 1,
            partitions: vec![],
            shard_to_partition: BTreeMap::new(),
            ttl: None,
        }
    }

    pub fn partitions(&self) -> &[TableShardInfo] {
        &self.partitions
    }

    pub fn partition(&self, shard_idx: ShardIdx) -> Option<&TableShardInfo> {
        let idx = *self.shard_to_partition.get(&shard_idx)?;
        self.partitions.get(idx)
    }

    pub fn is_ttl_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn ttl(&self) -> Option<&TtlState> {
        self.ttl.as_ref()
    }

    pub fn ttl_settings(&self) -> Option<&TtlSettings> {
        self.ttl.as_ref().map(|ttl| &ttl.settings)
    }

    pub fn in_flight_count(&self) -> usize {
        self.ttl.as_ref().map_or(0, |ttl| ttl.in_flight.len())
    }

    pub fn is_in_flight(&self, shard_idx: ShardIdx) -> bool {
        self.ttl
            .as_ref()
            .is_some_and(|ttl| ttl.in_flight.contains(&shard_idx))
    }

    /// The pending partition with the earliest due time, regardless of
    /// whether it is due yet.
    pub fn scheduled_cond_erase_shard(&self) -> Option<&TableShardInfo> {
        let ttl = self.ttl.as_ref()?;
        let (_, shard_idx) = ttl.schedule.first()?;
        self.partition(*shard_idx)
    }

    /// Move a pending partition to the in-flight set.
    pub fn add_in_flight_cond_erase(&mut self, shard_idx: ShardIdx) -> anyhow::Result<()> {
        let next = self.partition_or_err(shard_idx)?.next_cond_erase;
        let ttl = self.ttl_mut()?;
        anyhow::ensure!(
            ttl.schedule.remove(&(next, shard_idx)),
            "Shard {shard_idx} is not scheduled"
        );
        ttl.in_flight.insert(shard_idx);
        Ok(())
    }

    /// Return an in-flight partition to the schedule at its existing due
    /// time. That time has already passed, so it is immediately due again.
    pub fn reschedule_cond_erase(&mut self, shard_idx: ShardIdx) -> anyhow::Result<()> {
        let next = self.partition_or_err(shard_idx)?.next_cond_erase;
        let ttl = self.ttl_mut()?;
        anyhow::ensure!(
            ttl.in_flight.remove(&shard_idx),
            "Shard {shard_idx} is not in flight"
        );
        ttl.schedule.insert((next, shard_idx));
        Ok(())
    }

    /// Complete an in-flight partition: record how late it ran and schedule it
    /// `next` after `now`.
    pub fn schedule_next_cond_erase(
        &mut self,
        shard_idx: ShardIdx,
        now: UnixTimestamp,
        next: Duration,
    ) -> anyhow::Result<()> {
        let Some(&idx) = self.shard_to_partition.get(&shard_idx) else {
            anyhow::bail!("Shard {shard_idx} is not a partition of this table");
        };
        let ttl = self.ttl.as_mut().ok_or_else(|| anyhow::anyhow!("TTL is not enabled"))?;
        anyhow::ensure!(
            ttl.in_flight.remove(&shard_idx),
            "Shard {shard_idx} is not in flight"
        );
        let partition = &mut self.partitions[idx];
        // Whole seconds, as persisted.
        let lag = now.saturating_duration_since(partition.next_cond_erase);
        partition.last_cond_erase_lag = Some(Duration::from_secs(lag.as_secs()));
        partition.next_cond_erase = now + next;
        ttl.schedule.insert((partition.next_cond_erase, shard_idx));
        Ok(())
    }

    pub fn ttl_record(&self, table_id: PathId) -> Option<TableTtlRecord> {
        let ttl = self.ttl.as_ref()?;
        Some(TableTtlRecord {
            table_id,
            settings: ttl.settings.clone(),
            in_flight: ttl.in_flight.clone(),
        })
    }

    pub fn partition_record(
        &self,
        table_id: PathId,
        shard_idx: ShardIdx,
    ) -> Option<PartitionScheduleRecord> {
        let partition = self.partition(shard_idx)?;
        Some(PartitionScheduleRecord {
            table_id,
            shard_idx,
            next_eligible: partition.next_cond_erase,
            last_lag_secs: partition.last_cond_erase_lag.map(|lag| lag.as_secs()),
        })
    }

    /// Every partition of a TTL-enabled table is either in flight or
    /// scheduled at its recorded due time, and nothing else is tracked.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        for (shard_idx, &idx) in &self.shard_to_partition {
            let partition = self
                .partitions
                .get(idx)
                .ok_or_else(|| anyhow::anyhow!("Partition index {idx} out of range"))?;
            anyhow::ensure!(
                partition.shard_idx == *shard_idx,
                "Partition {idx} maps to {} but is recorded as {shard_idx}",
                partition.shard_idx
            );
        }
        anyhow::ensure!(
            self.shard_to_partition.len() == self.partitions.len(),
            "Duplicate shard in partition list"
        );
        let Some(ttl) = &self.ttl else {
            return Ok(());
        };
        anyhow::ensure!(
            ttl.in_flight.len() + ttl.schedule.len() == self.partitions.len(),
            "{} in flight + {} scheduled != {} partitions",
            ttl.in_flight.len(),
            ttl.schedule.len(),
            self.partitions.len()
        );
        for partition in &self.partitions {
            let in_flight = ttl.in_flight.contains(&partition.shard_idx);
            let scheduled = ttl
                .schedule
                .contains(&(partition.next_cond_erase, partition.shard_idx));
            anyhow::ensure!(
                in_flight != scheduled,
                "Shard {} in flight: {in_flight}, scheduled: {scheduled}",
                partition.shard_idx
            );
        }
        Ok(())
    }

    pub(crate) fn enable_ttl(&mut self, settings: TtlSettings, column_id: ColumnId, now: UnixTimestamp) {
        let mut ttl = TtlState::new(settings, column_id);
        for partition in &mut self.partitions {
            partition.next_cond_erase = now;
            partition.last_cond_erase_lag = None;
            ttl.schedule.insert((now, partition.shard_idx));
        }
        self.ttl = Some(ttl);
    }

    pub(crate) fn disable_ttl(&mut self) {
        self.ttl = None;
        for partition in &mut self.partitions {
            partition.last_cond_erase_lag = None;
        }
    }

    fn partition_or_err(&self, shard_idx: ShardIdx) -> anyhow::Result<&TableShardInfo> {
        self.partition(shard_idx)
            .ok_or_else(|| anyhow::anyhow!("Shard {shard_idx} is not a partition of this table"))
    }

    fn ttl_mut(&mut self) -> anyhow::Result<&mut TtlState> {
        self.ttl
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("TTL is not enabled"))
    }
}
