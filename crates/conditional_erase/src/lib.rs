//! TTL-driven conditional erase: decides which partitions of TTL-enabled
//! tables are due, sends them erase requests, and reschedules each partition
//! from the response its shard sends back.

use std::time::Duration;

use common::knobs::{
    TTL_ERASE_OPERATIONS_ENABLED,
    TTL_ERASE_RUN_INTERVAL,
    TTL_ERASE_SYSTEM_VIEWS_ENABLED,
    TTL_ERASE_WORKER_INITIAL_BACKOFF,
    TTL_ERASE_WORKER_MAX_BACKOFF,
};

mod dispatcher;
mod index_mapper;
mod metrics;
mod persistence;
mod reconciler;
mod scheduler;
mod transport;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use crate::{
    dispatcher::{
        DispatchOutcome,
        RunScope,
        run_due,
    },
    index_mapper::make_indexes,
    persistence::SchedulePersistence,
    reconciler::{
        LagChange,
        ReconcileOutcome,
        StaleReason,
        on_erase_response,
    },
    scheduler::{
        ConditionalEraseScheduler,
        ConditionalEraseTx,
    },
    transport::{
        EraseTransport,
        TtlStatsSink,
    },
    types::{
        EraseLimits,
        EraseRequest,
        EraseResponse,
        EraseStats,
        EraseStatus,
        Expiration,
        IndexDescriptor,
        KeyMapEntry,
        TtlStatsEvent,
    },
    worker::{
        ConditionalEraseClient,
        ConditionalEraseWorker,
    },
};
#[cfg(any(test, feature = "testing"))]
pub use crate::{
    persistence::TestSchedulePersistence,
    transport::{
        TestStatsCollector,
        TestTransport,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionalEraseConfig {
    pub erase_operations_enabled: bool,
    pub system_views_enabled: bool,
    /// Period of the dispatch pass over all TTL-enabled tables.
    pub run_interval: Duration,
    pub worker_initial_backoff: Duration,
    pub worker_max_backoff: Duration,
}

impl ConditionalEraseConfig {
    pub fn from_knobs() -> Self {
        Self {
            erase_operations_enabled: *TTL_ERASE_OPERATIONS_ENABLED,
            system_views_enabled: *TTL_ERASE_SYSTEM_VIEWS_ENABLED,
            run_interval: *TTL_ERASE_RUN_INTERVAL,
            worker_initial_backoff: *TTL_ERASE_WORKER_INITIAL_BACKOFF,
            worker_max_backoff: *TTL_ERASE_WORKER_MAX_BACKOFF,
        }
    }
}
