//! Stable identifiers for catalog entities. Records refer to each other only
//! through these ids, never through references into the catalog.

use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};

/// Identifies a catalog path (directory, table, index, index implementation
/// table). `owner_id` is the coordinator that allocated `local_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct PathId {
    pub owner_id: u64,
    pub local_id: u64,
}

impl PathId {
    pub const fn new(owner_id: u64, local_id: u64) -> Self {
        Self { owner_id, local_id }
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[OwnerId: {}, LocalPathId: {}]", self.owner_id, self.local_id)
    }
}

/// Identifies a shard record on the coordinator. Ordering is by owner then
/// local id, which is also the tie-break order of the erase schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct ShardIdx {
    pub owner_id: u64,
    pub local_id: u64,
}

impl ShardIdx {
    pub const fn new(owner_id: u64, local_id: u64) -> Self {
        Self { owner_id, local_id }
    }
}

impl fmt::Display for ShardIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_id, self.local_id)
    }
}

/// Address of the tablet that serves a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct TabletId(pub u64);

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
