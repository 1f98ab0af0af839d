//! Messages exchanged with shard tablets.

use catalog::ColumnUnit;
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyMapEntry {
    pub index_column_id: ColumnId,
    pub main_column_id: ColumnId,
}

/// A synchronous index whose rows must be erased together with the main
/// table's rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Path of the index implementation table.
    pub index_table: PathId,
    pub schema_version: u64,
    /// Index key columns first, then main-table key columns not already
    /// covered.
    pub key_map: Vec<KeyMapEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    pub column_id: ColumnId,
    /// Rows whose TTL column is older than this are erased.
    pub wall_clock_cutoff: UnixTimestamp,
    pub unit: ColumnUnit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseLimits {
    pub batch_max_bytes: u64,
    pub batch_min_keys: u64,
    pub batch_max_keys: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseRequest {
    pub table_id: PathId,
    pub schema_version: u64,
    pub indexes: Vec<IndexDescriptor>,
    pub expiration: Expiration,
    pub limits: EraseLimits,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EraseStatus {
    Ok,
    /// A prefix of the eligible rows was erased and more remain.
    Partial,
    BadRequest,
    Aborted,
    EraseError,
    Overloaded,
    SchemeError,
    /// A status code this coordinator does not know about.
    Unknown(u32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseStats {
    pub rows_processed: u64,
    pub rows_erased: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseResponse {
    pub tablet_id: TabletId,
    pub status: EraseStatus,
    pub error_description: String,
    pub stats: EraseStats,
}

impl EraseResponse {
    pub fn new(tablet_id: TabletId, status: EraseStatus) -> Self {
        Self {
            tablet_id,
            status,
            error_description: String::new(),
            stats: EraseStats::default(),
        }
    }
}

/// Per-partition TTL statistics for the system views.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlStatsEvent {
    pub table_id: PathId,
    pub shard_idx: ShardIdx,
    pub last_run_time: UnixTimestamp,
    pub rows_processed: u64,
    pub rows_erased: u64,
}
