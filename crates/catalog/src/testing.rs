//! Fixtures for building catalogs in tests.

use std::{
    ops::Range,
    time::Duration,
};

use common::types::{
    ShardIdx,
    TabletId,
};

use crate::{
    ColumnDescription,
    ColumnType,
    IndexDescription,
    IndexKind,
    PartitionDescription,
    TableDescription,
    TtlSettings,
};

pub const TEST_OWNER_ID: u64 = 72075186233409546;
pub const TEST_TABLET_BASE: u64 = 72075186224037888;

pub fn shard(local_id: u64) -> ShardIdx {
    ShardIdx::new(TEST_OWNER_ID, local_id)
}

pub fn tablet(local_id: u64) -> TabletId {
    TabletId(TEST_TABLET_BASE + local_id)
}

/// One partition per local shard id, each served by its own tablet.
pub fn partitions(local_ids: Range<u64>) -> Vec<PartitionDescription> {
    local_ids
        .map(|id| PartitionDescription {
            shard_idx: shard(id),
            tablet_id: tablet(id),
        })
        .collect()
}

/// Expire rows an hour after `created_at`, run hourly, retry after five
/// minutes.
pub fn ttl_settings() -> TtlSettings {
    let mut settings = TtlSettings::new("created_at", Duration::from_secs(3600));
    settings.sys.run_interval = Duration::from_secs(3600);
    settings.sys.retry_interval = Duration::from_secs(300);
    settings.sys.max_shards_in_flight = 0;
    settings
}

/// Columns `created_at, payload, a, b, c` with primary key `(a, c)`.
pub fn table_description(
    name: &str,
    partitions: Vec<PartitionDescription>,
    ttl: Option<TtlSettings>,
) -> TableDescription {
    TableDescription {
        name: name.to_owned(),
        columns: vec![
            ColumnDescription::new("created_at", ColumnType::Timestamp),
            ColumnDescription::new("payload", ColumnType::String),
            ColumnDescription::new("a", ColumnType::Uint64),
            ColumnDescription::new("b", ColumnType::Utf8),
            ColumnDescription::new("c", ColumnType::Uint64),
        ],
        key_columns: vec!["a".to_owned(), "c".to_owned()],
        partitions,
        indexes: vec![],
        ttl,
    }
}

pub fn index(name: &str, kind: IndexKind, keys: &[&str]) -> IndexDescription {
    IndexDescription {
        name: name.to_owned(),
        kind,
        keys: keys.iter().map(|k| (*k).to_owned()).collect(),
    }
}
