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
        TabletId,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum PathKind {
    Directory,
    Table,
    TableIndex,
    IndexImplTable,
}

/// A node of the catalog tree. Children are addressed by name and resolved
/// through `Catalog::path`.
#[derive(Clone, Debug, PartialEq)]
pub struct PathElement {
    pub path_id: PathId,
    pub parent: Option<PathId>,
    pub name: String,
    pub kind: PathKind,
    pub(crate) dropped: bool,
    pub(crate) children: BTreeMap<String, PathId>,
}

impl PathElement {
    pub(crate) fn new(path_id: PathId, parent: Option<PathId>, name: String, kind: PathKind) -> Self {
        Self {
            path_id,
            parent,
            name,
            kind,
            dropped: false,
            children: BTreeMap::new(),
        }
    }

    pub fn dropped(&self) -> bool {
        self.dropped
    }

    pub fn is_table_index(&self) -> bool {
        self.kind == PathKind::TableIndex
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, PathId)> + '_ {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ColumnType {
    Bool,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    DyNumber,
    String,
    Utf8,
    Date,
    Datetime,
    Timestamp,
}

impl ColumnType {
    pub fn is_calendar(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp)
    }

    /// Types that can hold a raw epoch offset in a fixed unit.
    pub fn is_epoch_number(&self) -> bool {
        matches!(self, ColumnType::Uint32 | ColumnType::Uint64 | ColumnType::DyNumber)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub name: String,
    pub ty: ColumnType,
    pub dropped: bool,
}

/// Per-partition schedule entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableShardInfo {
    pub shard_idx: ShardIdx,
    pub next_cond_erase: UnixTimestamp,
    /// How late the last reconciled erase pass ran relative to when it was
    /// due. `None` until the partition has been reconciled once.
    pub last_cond_erase_lag: Option<Duration>,
}

impl TableShardInfo {
    pub(crate) fn new(shard_idx: ShardIdx, now: UnixTimestamp) -> Self {
        Self {
            shard_idx,
            next_cond_erase: now,
            last_cond_erase_lag: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardInfo {
    pub tablet_id: TabletId,
    /// The table that owns this shard.
    pub path_id: PathId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum IndexKind {
    GlobalSync,
    GlobalAsync,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableIndexInfo {
    pub kind: IndexKind,
    /// Names of the indexed columns, in index key order.
    pub keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub kind: IndexKind,
    pub keys: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionDescription {
    pub shard_idx: ShardIdx,
    pub tablet_id: TabletId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
    pub key_columns: Vec<String>,
    pub partitions: Vec<PartitionDescription>,
    pub indexes: Vec<IndexDescription>,
    pub ttl: Option<crate::TtlSettings>,
}
