use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    time::Duration,
};

use common::{
    knobs::{
        TTL_DEFAULT_BATCH_MAX_BYTES,
        TTL_DEFAULT_BATCH_MAX_KEYS,
        TTL_DEFAULT_BATCH_MIN_KEYS,
        TTL_DEFAULT_MAX_SHARDS_IN_FLIGHT,
        TTL_DEFAULT_RETRY_INTERVAL,
        TTL_DEFAULT_RUN_INTERVAL,
    },
    runtime::UnixTimestamp,
    types::{
        ColumnId,
        ShardIdx,
    },
};
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

use crate::types::ColumnInfo;

/// How the TTL column encodes time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ColumnUnit {
    /// The column is a calendar type and carries its own unit.
    #[default]
    Auto,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

/// Knobs of a TTL policy that govern how the coordinator drives erasure
/// rather than which rows expire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSysSettings {
    pub run_interval: Duration,
    pub retry_interval: Duration,
    pub batch_max_bytes: u64,
    pub batch_min_keys: u64,
    pub batch_max_keys: u64,
    /// 0 means unbounded.
    pub max_shards_in_flight: u32,
}

impl Default for TtlSysSettings {
    fn default() -> Self {
        Self {
            run_interval: *TTL_DEFAULT_RUN_INTERVAL,
            retry_interval: *TTL_DEFAULT_RETRY_INTERVAL,
            batch_max_bytes: *TTL_DEFAULT_BATCH_MAX_BYTES,
            batch_min_keys: *TTL_DEFAULT_BATCH_MIN_KEYS,
            batch_max_keys: *TTL_DEFAULT_BATCH_MAX_KEYS,
            max_shards_in_flight: *TTL_DEFAULT_MAX_SHARDS_IN_FLIGHT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSettings {
    pub column_name: String,
    pub column_unit: ColumnUnit,
    pub expire_after: Duration,
    pub sys: TtlSysSettings,
}

impl TtlSettings {
    pub fn new(column_name: impl Into<String>, expire_after: Duration) -> Self {
        Self {
            column_name: column_name.into(),
            column_unit: ColumnUnit::Auto,
            expire_after,
            sys: TtlSysSettings::default(),
        }
    }

    /// Check the policy against the table's columns and return the id of the
    /// TTL column.
    pub fn validate(&self, columns: &BTreeMap<ColumnId, ColumnInfo>) -> anyhow::Result<ColumnId> {
        let Some(column) = columns
            .values()
            .find(|c| !c.dropped && c.name == self.column_name)
        else {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTtlColumn",
                format!("Cannot enable TTL on unknown column: '{}'", self.column_name),
            ));
        };
        let type_ok = match self.column_unit {
            ColumnUnit::Auto => column.ty.is_calendar(),
            ColumnUnit::Seconds
            | ColumnUnit::Milliseconds
            | ColumnUnit::Microseconds
            | ColumnUnit::Nanoseconds => column.ty.is_epoch_number(),
        };
        if !type_ok {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTtlColumnType",
                format!(
                    "Column '{}' of type {} cannot be used for TTL with unit {}",
                    column.name, column.ty, self.column_unit
                ),
            ));
        }
        if self.sys.run_interval.is_zero() || self.sys.retry_interval.is_zero() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTtlInterval",
                "TTL run and retry intervals must be non-zero",
            ));
        }
        if self.sys.batch_min_keys > self.sys.batch_max_keys {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTtlBatchLimits",
                format!(
                    "TTL batch min keys ({}) exceeds max keys ({})",
                    self.sys.batch_min_keys, self.sys.batch_max_keys
                ),
            ));
        }
        Ok(column.id)
    }
}

/// TTL policy of a table plus the bookkeeping for its erase schedule. Every
/// partition shard is either in `in_flight` or in `schedule`, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TtlState {
    pub(crate) settings: TtlSettings,
    pub(crate) column_id: ColumnId,
    pub(crate) in_flight: BTreeSet<ShardIdx>,
    /// Pending partitions ordered by due time, ties broken by shard.
    pub(crate) schedule: BTreeSet<(UnixTimestamp, ShardIdx)>,
}

impl TtlState {
    pub(crate) fn new(settings: TtlSettings, column_id: ColumnId) -> Self {
        Self {
            settings,
            column_id,
            in_flight: BTreeSet::new(),
            schedule: BTreeSet::new(),
        }
    }

    pub fn settings(&self) -> &TtlSettings {
        &self.settings
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn in_flight(&self) -> &BTreeSet<ShardIdx> {
        &self.in_flight
    }

    pub fn schedule(&self) -> impl Iterator<Item = (UnixTimestamp, ShardIdx)> + '_ {
        self.schedule.iter().copied()
    }
}
