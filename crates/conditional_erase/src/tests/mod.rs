use std::{
    sync::Arc,
    time::Duration,
};

use catalog::{
    Catalog,
    testing::{
        TEST_OWNER_ID,
        partitions,
        table_description,
        ttl_settings,
    },
};
use common::{
    runtime::{
        Runtime,
        UnixTimestamp,
    },
    types::PathId,
};

use crate::{
    ConditionalEraseConfig,
    ConditionalEraseScheduler,
    TestSchedulePersistence,
    TestStatsCollector,
    TestTransport,
};

mod dispatcher;

pub const RUN_INTERVAL: Duration = Duration::from_secs(3600);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(300);

pub fn t0() -> UnixTimestamp {
    UnixTimestamp::from_secs(1_620_198_000)
}

pub fn test_config() -> ConditionalEraseConfig {
    ConditionalEraseConfig {
        erase_operations_enabled: true,
        system_views_enabled: true,
        run_interval: Duration::from_secs(60),
        worker_initial_backoff: Duration::from_millis(100),
        worker_max_backoff: Duration::from_secs(1),
    }
}

/// A catalog with one TTL-enabled table whose partitions are shards
/// `1..=num_partitions`, all due at `now`.
pub fn ttl_catalog(num_partitions: u64, max_in_flight: u32, now: UnixTimestamp) -> (Catalog, PathId) {
    let mut catalog = Catalog::new(TEST_OWNER_ID);
    let mut settings = ttl_settings();
    settings.sys.max_shards_in_flight = max_in_flight;
    let desc = table_description("events", partitions(1..num_partitions + 1), Some(settings));
    let (table_id, _) = catalog
        .create_table(catalog.root(), desc, now)
        .expect("Failed to create table");
    (catalog, table_id)
}

pub struct Fixture<RT: Runtime> {
    pub rt: RT,
    pub scheduler: ConditionalEraseScheduler<RT>,
    pub persistence: TestSchedulePersistence,
    pub transport: TestTransport,
    pub stats: TestStatsCollector,
}

impl<RT: Runtime> Fixture<RT> {
    pub fn new(rt: RT, catalog: Catalog) -> Self {
        Self::with_persistence(rt, catalog, TestSchedulePersistence::new())
    }

    pub fn with_persistence(rt: RT, catalog: Catalog, persistence: TestSchedulePersistence) -> Self {
        let transport = TestTransport::new();
        let stats = TestStatsCollector::new();
        let scheduler = ConditionalEraseScheduler::new(
            rt.clone(),
            catalog,
            Arc::new(persistence.clone()),
            Arc::new(transport.clone()),
            Arc::new(stats.clone()),
            &test_config(),
        );
        Self {
            rt,
            scheduler,
            persistence,
            transport,
            stats,
        }
    }
}
