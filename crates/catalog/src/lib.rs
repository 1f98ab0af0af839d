//! Coordinator catalog: paths, tables, indexes and shards, plus the TTL erase
//! schedule each TTL-enabled table carries.
//!
//! Entities refer to one another only by id (`PathId`, `ShardIdx`,
//! `TabletId`). The catalog is backed by persistent maps so a transaction can
//! clone it, mutate the clone and swap it in on commit.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use common::{
    runtime::UnixTimestamp,
    types::{
        ColumnId,
        PathId,
        ShardIdx,
        TabletId,
    },
};
use errors::ErrorMetadata;
use imbl::{
    OrdMap,
    OrdSet,
};
use itertools::Itertools;

mod records;
mod table;
mod ttl;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(test)]
mod tests;

pub use crate::{
    records::{
        PartitionScheduleRecord,
        ScheduleSnapshot,
        ScheduleWrite,
        TableTtlRecord,
    },
    table::TableInfo,
    ttl::{
        ColumnUnit,
        TtlSettings,
        TtlState,
        TtlSysSettings,
    },
    types::{
        ColumnDescription,
        ColumnInfo,
        ColumnType,
        IndexDescription,
        IndexKind,
        PartitionDescription,
        PathElement,
        PathKind,
        ShardInfo,
        TableDescription,
        TableIndexInfo,
        TableShardInfo,
    },
};

/// Name of the single child path under an index that holds its rows.
pub const INDEX_IMPL_TABLE_NAME: &str = "indexImplTable";

#[derive(Clone, Debug)]
pub struct Catalog {
    owner_id: u64,
    root: PathId,
    next_local_path_id: u64,
    paths: OrdMap<PathId, PathElement>,
    tables: OrdMap<PathId, TableInfo>,
    indexes: OrdMap<PathId, TableIndexInfo>,
    shards: OrdMap<ShardIdx, ShardInfo>,
    tablet_to_shard: OrdMap<TabletId, ShardIdx>,
    ttl_enabled_tables: OrdSet<PathId>,
}

impl Catalog {
    pub fn new(owner_id: u64) -> Self {
        let root = PathId::new(owner_id, 1);
        let mut paths = OrdMap::new();
        paths.insert(
            root,
            PathElement::new(root, None, "/".to_owned(), PathKind::Directory),
        );
        Self {
            owner_id,
            root,
            next_local_path_id: 2,
            paths,
            tables: OrdMap::new(),
            indexes: OrdMap::new(),
            shards: OrdMap::new(),
            tablet_to_shard: OrdMap::new(),
            ttl_enabled_tables: OrdSet::new(),
        }
    }

    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    pub fn root(&self) -> PathId {
        self.root
    }

    pub fn path(&self, path_id: PathId) -> Option<&PathElement> {
        self.paths.get(&path_id)
    }

    pub fn table(&self, path_id: PathId) -> Option<&TableInfo> {
        self.tables.get(&path_id)
    }

    pub fn table_mut(&mut self, path_id: PathId) -> Option<&mut TableInfo> {
        self.tables.get_mut(&path_id)
    }

    pub fn index(&self, path_id: PathId) -> Option<&TableIndexInfo> {
        self.indexes.get(&path_id)
    }

    pub fn shard(&self, shard_idx: ShardIdx) -> Option<&ShardInfo> {
        self.shards.get(&shard_idx)
    }

    pub fn shard_for_tablet(&self, tablet_id: TabletId) -> Option<ShardIdx> {
        self.tablet_to_shard.get(&tablet_id).copied()
    }

    pub fn is_ttl_enabled_table(&self, path_id: PathId) -> bool {
        self.ttl_enabled_tables.contains(&path_id)
    }

    pub fn ttl_enabled_tables(&self) -> impl Iterator<Item = PathId> + '_ {
        self.ttl_enabled_tables.iter().copied()
    }

    /// Look up a direct child of `parent` by name.
    pub fn child(&self, parent: PathId, name: &str) -> Option<PathId> {
        self.paths.get(&parent)?.children.get(name).copied()
    }

    pub fn check_invariants(&self) -> anyhow::Result<()> {
        for table_id in &self.ttl_enabled_tables {
            let table = self
                .tables
                .get(table_id)
                .ok_or_else(|| anyhow::anyhow!("TTL-enabled table {table_id} is missing"))?;
            anyhow::ensure!(table.is_ttl_enabled(), "{table_id} has no TTL state");
        }
        for (table_id, table) in &self.tables {
            anyhow::ensure!(
                table.is_ttl_enabled() == self.ttl_enabled_tables.contains(table_id),
                "TTL-enabled set out of sync for {table_id}"
            );
            table.check_invariants()?;
        }
        Ok(())
    }

    pub fn create_table(
        &mut self,
        parent: PathId,
        desc: TableDescription,
        now: UnixTimestamp,
    ) -> anyhow::Result<(PathId, Vec<ScheduleWrite>)> {
        let parent_path = self.live_path(parent)?;
        if parent_path.kind != PathKind::Directory {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidParentPath",
                format!("Cannot create table under {}: not a directory", parent_path.name),
            ));
        }
        if parent_path.children.contains_key(&desc.name) {
            anyhow::bail!(ErrorMetadata::bad_request(
                "PathExists",
                format!("Path {} already exists", desc.name),
            ));
        }
        if let Some(dup) = desc.columns.iter().map(|c| &c.name).duplicates().next() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "DuplicateColumn",
                format!("Column {dup} is declared more than once"),
            ));
        }
        let columns: BTreeMap<ColumnId, ColumnInfo> = desc
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let id = ColumnId(1 + i as u32);
                (
                    id,
                    ColumnInfo {
                        id,
                        name: c.name.clone(),
                        ty: c.ty,
                        dropped: false,
                    },
                )
            })
            .collect();
        let column_by_name = |name: &str| columns.values().find(|c| c.name == name);
        if desc.key_columns.is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "MissingKeyColumns",
                format!("Table {} has no key columns", desc.name),
            ));
        }
        let key_column_ids = desc
            .key_columns
            .iter()
            .map(|name| {
                column_by_name(name).map(|c| c.id).ok_or_else(|| {
                    anyhow::anyhow!(ErrorMetadata::bad_request(
                        "InvalidKeyColumn",
                        format!("Key column {name} is not a column of {}", desc.name),
                    ))
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        if let Some(dup) = desc.indexes.iter().map(|i| &i.name).duplicates().next() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "DuplicateIndex",
                format!("Index {dup} is declared more than once"),
            ));
        }
        for index in &desc.indexes {
            if index.keys.is_empty() {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "InvalidIndexKeys",
                    format!("Index {} has no key columns", index.name),
                ));
            }
            if let Some(key) = index.keys.iter().find(|k| column_by_name(k).is_none()) {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "InvalidIndexKeys",
                    format!("Index {} references unknown column {key}", index.name),
                ));
            }
        }
        self.validate_partitions(None, &desc.partitions)?;
        let ttl_column_id = desc
            .ttl
            .as_ref()
            .map(|ttl| ttl.validate(&columns))
            .transpose()?;

        let table_id = self.allocate_path_id();
        self.insert_path(PathElement::new(
            table_id,
            Some(parent),
            desc.name.clone(),
            PathKind::Table,
        ));
        for index in &desc.indexes {
            let index_id = self.allocate_path_id();
            self.insert_path(PathElement::new(
                index_id,
                Some(table_id),
                index.name.clone(),
                PathKind::TableIndex,
            ));
            self.indexes.insert(
                index_id,
                TableIndexInfo {
                    kind: index.kind,
                    keys: index.keys.clone(),
                },
            );
            let impl_id = self.allocate_path_id();
            self.insert_path(PathElement::new(
                impl_id,
                Some(index_id),
                INDEX_IMPL_TABLE_NAME.to_owned(),
                PathKind::IndexImplTable,
            ));
            // Index keys first, then the primary key columns they don't cover.
            let impl_names: Vec<&String> = index
                .keys
                .iter()
                .chain(desc.key_columns.iter())
                .unique()
                .collect();
            let impl_columns: BTreeMap<ColumnId, ColumnInfo> = impl_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    let main = column_by_name(name)?;
                    let id = ColumnId(1 + i as u32);
                    Some((
                        id,
                        ColumnInfo {
                            id,
                            name: main.name.clone(),
                            ty: main.ty,
                            dropped: false,
                        },
                    ))
                })
                .collect();
            let impl_keys = impl_columns.keys().copied().collect();
            self.tables
                .insert(impl_id, TableInfo::new(impl_columns, impl_keys));
        }

        let mut table = TableInfo::new(columns, key_column_ids);
        for partition in &desc.partitions {
            Self::push_partition(&mut table, partition.shard_idx, now);
            self.register_shard(table_id, *partition);
        }
        let mut writes = vec![];
        if let (Some(settings), Some(column_id)) = (desc.ttl, ttl_column_id) {
            table.enable_ttl(settings, column_id, now);
            self.ttl_enabled_tables.insert(table_id);
            writes = Self::full_schedule_writes(table_id, &table);
        }
        self.tables.insert(table_id, table);
        tracing::info!(
            "Created table {} {table_id} with {} partitions, at coordinator: {}",
            desc.name,
            desc.partitions.len(),
            self.owner_id
        );
        Ok((table_id, writes))
    }

    /// Enable, change or disable the TTL policy of a table. Enabling makes
    /// every partition due immediately; changing keeps the schedule and
    /// in-flight set; disabling forgets both.
    pub fn alter_ttl(
        &mut self,
        table_id: PathId,
        ttl: Option<TtlSettings>,
        now: UnixTimestamp,
    ) -> anyhow::Result<Vec<ScheduleWrite>> {
        self.live_table_path(table_id)?;
        let table = self
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| Self::table_not_found(table_id))?;
        let writes = match (table.is_ttl_enabled(), ttl) {
            (false, None) => return Ok(vec![]),
            (true, Some(settings)) => {
                let column_id = settings.validate(&table.columns)?;
                if let Some(state) = table.ttl.as_mut() {
                    state.column_id = column_id;
                    state.settings = settings;
                }
                table.alter_version += 1;
                table.ttl_record(table_id).into_iter().map(ScheduleWrite::Table).collect()
            },
            (false, Some(settings)) => {
                let column_id = settings.validate(&table.columns)?;
                table.enable_ttl(settings, column_id, now);
                table.alter_version += 1;
                self.ttl_enabled_tables.insert(table_id);
                Self::full_schedule_writes(table_id, table)
            },
            (true, None) => {
                let mut writes = vec![ScheduleWrite::DeleteTable { table_id }];
                writes.extend(table.partitions.iter().map(|p| ScheduleWrite::DeletePartition {
                    table_id,
                    shard_idx: p.shard_idx,
                }));
                table.disable_ttl();
                table.alter_version += 1;
                self.ttl_enabled_tables.remove(&table_id);
                writes
            },
        };
        tracing::info!(
            "Altered TTL of table {table_id}, enabled: {}, at coordinator: {}",
            self.ttl_enabled_tables.contains(&table_id),
            self.owner_id
        );
        Ok(writes)
    }

    /// Replace the partition list of a table after a split or merge. Kept
    /// partitions retain their schedule; removed ones leave the schedule and
    /// the in-flight set; new ones are due immediately.
    pub fn set_partitions(
        &mut self,
        table_id: PathId,
        partitions: Vec<PartitionDescription>,
        now: UnixTimestamp,
    ) -> anyhow::Result<Vec<ScheduleWrite>> {
        self.live_table_path(table_id)?;
        self.validate_partitions(Some(table_id), &partitions)?;
        let table = self
            .tables
            .get(&table_id)
            .ok_or_else(|| Self::table_not_found(table_id))?;
        let new_shards: BTreeSet<ShardIdx> = partitions.iter().map(|p| p.shard_idx).collect();

        let mut table = table.clone();
        let old_partitions = std::mem::take(&mut table.partitions);
        table.shard_to_partition.clear();
        let mut writes = vec![];
        for old in &old_partitions {
            if new_shards.contains(&old.shard_idx) {
                continue;
            }
            if let Some(ttl) = table.ttl.as_mut() {
                ttl.in_flight.remove(&old.shard_idx);
                ttl.schedule.remove(&(old.next_cond_erase, old.shard_idx));
                writes.push(ScheduleWrite::DeletePartition {
                    table_id,
                    shard_idx: old.shard_idx,
                });
            }
        }
        for partition in &partitions {
            match old_partitions.iter().find(|p| p.shard_idx == partition.shard_idx) {
                Some(kept) => {
                    table
                        .shard_to_partition
                        .insert(kept.shard_idx, table.partitions.len());
                    table.partitions.push(kept.clone());
                },
                None => {
                    Self::push_partition(&mut table, partition.shard_idx, now);
                    if let Some(ttl) = table.ttl.as_mut() {
                        ttl.schedule.insert((now, partition.shard_idx));
                        writes.extend(
                            table
                                .partition_record(table_id, partition.shard_idx)
                                .map(ScheduleWrite::Partition),
                        );
                    }
                    self.register_shard(table_id, *partition);
                },
            }
        }
        table.alter_version += 1;
        writes.extend(table.ttl_record(table_id).map(ScheduleWrite::Table));
        self.tables.insert(table_id, table);
        tracing::info!(
            "Repartitioned table {table_id} into {} partitions, at coordinator: {}",
            partitions.len(),
            self.owner_id
        );
        Ok(writes)
    }

    /// Mark a table and everything under it dropped. Records stay resolvable
    /// until `forget_table`.
    pub fn drop_table(&mut self, table_id: PathId) -> anyhow::Result<()> {
        self.live_table_path(table_id)?;
        let mut stack = vec![table_id];
        while let Some(path_id) = stack.pop() {
            if let Some(path) = self.paths.get_mut(&path_id) {
                path.dropped = true;
                stack.extend(path.children.values().copied());
            }
        }
        tracing::info!("Dropped table {table_id}, at coordinator: {}", self.owner_id);
        Ok(())
    }

    /// Mark one index of a table, and its implementation table, dropped.
    pub fn drop_index(&mut self, table_id: PathId, index_name: &str) -> anyhow::Result<()> {
        let table_path = self.live_table_path(table_id)?;
        let index_id = match table_path.children.get(index_name) {
            Some(id) if self.paths.get(id).is_some_and(|p| p.is_table_index() && !p.dropped) => *id,
            _ => anyhow::bail!(ErrorMetadata::not_found(
                "IndexNotFound",
                format!("Index {index_name} not found on table {table_id}"),
            )),
        };
        let mut stack = vec![index_id];
        while let Some(path_id) = stack.pop() {
            if let Some(path) = self.paths.get_mut(&path_id) {
                path.dropped = true;
                stack.extend(path.children.values().copied());
            }
        }
        if let Some(table) = self.tables.get_mut(&table_id) {
            table.alter_version += 1;
        }
        tracing::info!(
            "Dropped index {index_name} of table {table_id}, at coordinator: {}",
            self.owner_id
        );
        Ok(())
    }

    /// Remove every record of a dropped table.
    pub fn forget_table(&mut self, table_id: PathId) -> anyhow::Result<Vec<ScheduleWrite>> {
        let path = self
            .paths
            .get(&table_id)
            .ok_or_else(|| Self::table_not_found(table_id))?;
        if !path.dropped {
            anyhow::bail!(ErrorMetadata::bad_request(
                "TableNotDropped",
                format!("Table {table_id} must be dropped before it is forgotten"),
            ));
        }
        let parent = path.parent;
        let name = path.name.clone();
        let mut writes = vec![];
        if let Some(table) = self.tables.get(&table_id)
            && table.is_ttl_enabled()
        {
            writes.push(ScheduleWrite::DeleteTable { table_id });
            writes.extend(table.partitions.iter().map(|p| ScheduleWrite::DeletePartition {
                table_id,
                shard_idx: p.shard_idx,
            }));
        }
        let mut stack = vec![table_id];
        while let Some(path_id) = stack.pop() {
            if let Some(path) = self.paths.remove(&path_id) {
                stack.extend(path.children.values().copied());
            }
            self.tables.remove(&path_id);
            self.indexes.remove(&path_id);
        }
        if let Some(parent) = parent.and_then(|p| self.paths.get_mut(&p)) {
            parent.children.remove(&name);
        }
        self.ttl_enabled_tables.remove(&table_id);
        tracing::info!("Forgot table {table_id}, at coordinator: {}", self.owner_id);
        Ok(writes)
    }

    /// Delete the shard record once its tablet is gone.
    pub fn forget_shard(&mut self, shard_idx: ShardIdx) -> anyhow::Result<()> {
        let Some(shard) = self.shards.remove(&shard_idx) else {
            anyhow::bail!(ErrorMetadata::not_found(
                "ShardNotFound",
                format!("Shard {shard_idx} not found"),
            ));
        };
        self.tablet_to_shard.remove(&shard.tablet_id);
        tracing::info!(
            "Forgot shard {shard_idx} (tablet {}), at coordinator: {}",
            shard.tablet_id,
            self.owner_id
        );
        Ok(())
    }

    /// Rebuild TTL policies, due times, lags and in-flight sets from durable
    /// records. Records for tables or partitions that no longer exist are
    /// ignored.
    pub fn restore_schedule(&mut self, snapshot: ScheduleSnapshot) -> anyhow::Result<()> {
        let mut partitions_by_table: BTreeMap<PathId, Vec<PartitionScheduleRecord>> =
            BTreeMap::new();
        for record in snapshot.partitions {
            partitions_by_table
                .entry(record.table_id)
                .or_default()
                .push(record);
        }
        for record in snapshot.tables {
            let table_id = record.table_id;
            let Some(table) = self.tables.get_mut(&table_id) else {
                tracing::warn!(
                    "Ignoring schedule of unknown table {table_id}, at coordinator: {}",
                    self.owner_id
                );
                continue;
            };
            let column_id = record.settings.validate(&table.columns)?;
            for partition in partitions_by_table.remove(&table_id).unwrap_or_default() {
                let Some(&idx) = table.shard_to_partition.get(&partition.shard_idx) else {
                    continue;
                };
                let entry = &mut table.partitions[idx];
                entry.next_cond_erase = partition.next_eligible;
                entry.last_cond_erase_lag =
                    partition.last_lag_secs.map(std::time::Duration::from_secs);
            }
            let mut ttl = TtlState::new(record.settings, column_id);
            for partition in &table.partitions {
                if record.in_flight.contains(&partition.shard_idx) {
                    ttl.in_flight.insert(partition.shard_idx);
                } else {
                    ttl.schedule
                        .insert((partition.next_cond_erase, partition.shard_idx));
                }
            }
            table.ttl = Some(ttl);
            table.check_invariants()?;
            self.ttl_enabled_tables.insert(table_id);
        }
        tracing::info!(
            "Restored erase schedule for {} tables, at coordinator: {}",
            self.ttl_enabled_tables.len(),
            self.owner_id
        );
        Ok(())
    }

    fn full_schedule_writes(table_id: PathId, table: &TableInfo) -> Vec<ScheduleWrite> {
        table
            .ttl_record(table_id)
            .map(ScheduleWrite::Table)
            .into_iter()
            .chain(
                table
                    .partitions
                    .iter()
                    .filter_map(|p| table.partition_record(table_id, p.shard_idx))
                    .map(ScheduleWrite::Partition),
            )
            .collect()
    }

    fn push_partition(table: &mut TableInfo, shard_idx: ShardIdx, now: UnixTimestamp) {
        table
            .shard_to_partition
            .insert(shard_idx, table.partitions.len());
        table.partitions.push(TableShardInfo::new(shard_idx, now));
    }

    fn register_shard(&mut self, table_id: PathId, partition: PartitionDescription) {
        self.shards.insert(
            partition.shard_idx,
            ShardInfo {
                tablet_id: partition.tablet_id,
                path_id: table_id,
            },
        );
        self.tablet_to_shard
            .insert(partition.tablet_id, partition.shard_idx);
    }

    /// Shards may only be reused by the table that already owns them, and a
    /// tablet serves at most one shard.
    fn validate_partitions(
        &self,
        table_id: Option<PathId>,
        partitions: &[PartitionDescription],
    ) -> anyhow::Result<()> {
        if partitions.is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "MissingPartitions",
                "A table needs at least one partition",
            ));
        }
        if let Some(dup) = partitions.iter().map(|p| p.shard_idx).duplicates().next() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "DuplicateShard",
                format!("Shard {dup} is listed more than once"),
            ));
        }
        if let Some(dup) = partitions.iter().map(|p| p.tablet_id).duplicates().next() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "DuplicateTablet",
                format!("Tablet {dup} is listed more than once"),
            ));
        }
        for partition in partitions {
            if let Some(existing) = self.shards.get(&partition.shard_idx)
                && (Some(existing.path_id) != table_id
                    || existing.tablet_id != partition.tablet_id)
            {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "ShardInUse",
                    format!("Shard {} already belongs to {}", partition.shard_idx, existing.path_id),
                ));
            }
            if let Some(existing) = self.tablet_to_shard.get(&partition.tablet_id)
                && *existing != partition.shard_idx
            {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "TabletInUse",
                    format!("Tablet {} already serves shard {existing}", partition.tablet_id),
                ));
            }
        }
        Ok(())
    }

    fn allocate_path_id(&mut self) -> PathId {
        let path_id = PathId::new(self.owner_id, self.next_local_path_id);
        self.next_local_path_id += 1;
        path_id
    }

    fn insert_path(&mut self, path: PathElement) {
        if let Some(parent) = path.parent.and_then(|p| self.paths.get_mut(&p)) {
            parent.children.insert(path.name.clone(), path.path_id);
        }
        self.paths.insert(path.path_id, path);
    }

    fn live_path(&self, path_id: PathId) -> anyhow::Result<&PathElement> {
        match self.paths.get(&path_id) {
            Some(path) if !path.dropped => Ok(path),
            _ => Err(anyhow::anyhow!(ErrorMetadata::not_found(
                "PathNotFound",
                format!("Path {path_id} not found"),
            ))),
        }
    }

    fn live_table_path(&self, table_id: PathId) -> anyhow::Result<&PathElement> {
        let path = self.live_path(table_id)?;
        if path.kind != PathKind::Table {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NotATable",
                format!("Path {table_id} is a {}, not a table", path.kind),
            ));
        }
        Ok(path)
    }

    fn table_not_found(table_id: PathId) -> anyhow::Error {
        anyhow::anyhow!(ErrorMetadata::not_found(
            "TableNotFound",
            format!("Table {table_id} not found"),
        ))
    }
}
