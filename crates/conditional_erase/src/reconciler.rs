//! Applies one erase response to the schedule of the partition it answers.

use std::time::Duration;

use catalog::{
    Catalog,
    ScheduleWrite,
};
use common::{
    runtime::UnixTimestamp,
    types::PathId,
};
use itertools::Itertools;

use crate::types::{
    EraseResponse,
    EraseStatus,
    TtlStatsEvent,
};

/// Why a response was dropped without touching the schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StaleReason {
    UnknownTablet,
    UnknownShard,
    TtlDisabled,
    NotInFlight,
}

/// A partition moved from one lag bucket to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LagChange {
    pub prior: Option<Duration>,
    pub new: Duration,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub writes: Vec<ScheduleWrite>,
    /// Set once the schedule was re-armed; the owning table should be
    /// dispatched again right after commit.
    pub rerun_table: Option<PathId>,
    pub stats_event: Option<TtlStatsEvent>,
    pub lag_change: Option<LagChange>,
    pub stale: Option<StaleReason>,
}

pub fn on_erase_response(
    catalog: &mut Catalog,
    response: &EraseResponse,
    now: UnixTimestamp,
    erase_enabled: bool,
    system_views_enabled: bool,
) -> anyhow::Result<ReconcileOutcome> {
    let coordinator = catalog.owner_id();
    let mut outcome = ReconcileOutcome::default();
    if !erase_enabled {
        tracing::info!(
            "Conditional erase operations are not allowed, skip reconciliation, at \
             coordinator: {coordinator}"
        );
        return Ok(outcome);
    }
    let tablet_id = response.tablet_id;

    let Some(shard_idx) = catalog.shard_for_tablet(tablet_id) else {
        tracing::warn!(
            "Unable to resolve shard idx: tabletId: {tablet_id}, at coordinator: {coordinator}"
        );
        outcome.stale = Some(StaleReason::UnknownTablet);
        return Ok(outcome);
    };
    let Some(shard) = catalog.shard(shard_idx) else {
        tracing::warn!(
            "Unable to resolve shard info: tabletId: {tablet_id}, at coordinator: {coordinator}"
        );
        outcome.stale = Some(StaleReason::UnknownShard);
        return Ok(outcome);
    };
    let table_id = shard.path_id;
    let Some(table) = catalog
        .table(table_id)
        .filter(|_| catalog.is_ttl_enabled_table(table_id))
    else {
        tracing::warn!(
            "TTL is not enabled for table: tabletId: {tablet_id}, tableId: {table_id}, at \
             coordinator: {coordinator}"
        );
        outcome.stale = Some(StaleReason::TtlDisabled);
        return Ok(outcome);
    };
    let Some(ttl) = table.ttl() else {
        tracing::error!(
            "TTL is not enabled for table: tabletId: {tablet_id}, tableId: {table_id}, at \
             coordinator: {coordinator}"
        );
        outcome.stale = Some(StaleReason::TtlDisabled);
        return Ok(outcome);
    };
    if !ttl.in_flight().contains(&shard_idx) {
        tracing::warn!(
            "Shard idx mismatch, tableId: {table_id}, shardIdx: {shard_idx}, in-flight shards: \
             [{}], at coordinator: {coordinator}",
            ttl.in_flight().iter().join(",")
        );
        outcome.stale = Some(StaleReason::NotInFlight);
        return Ok(outcome);
    }

    let sys = &ttl.settings().sys;
    let next = match response.status {
        EraseStatus::Partial => {
            // Progress within a pass isn't tracked; the shard stays in flight
            // until it reports a final status.
            return Ok(outcome);
        },
        EraseStatus::Ok => {
            tracing::info!(
                "Successful conditional erase: tabletId: {tablet_id}, at coordinator: \
                 {coordinator}"
            );
            sys.run_interval
        },
        EraseStatus::BadRequest
        | EraseStatus::Aborted
        | EraseStatus::EraseError
        | EraseStatus::Overloaded
        | EraseStatus::SchemeError => {
            tracing::error!(
                "Unsuccessful conditional erase: tabletId: {tablet_id}, status: {}, error: {}, \
                 retry after: {:?}, at coordinator: {coordinator}",
                response.status,
                response.error_description,
                sys.retry_interval
            );
            sys.retry_interval
        },
        EraseStatus::Unknown(code) => {
            tracing::warn!(
                "Unknown conditional erase status: tabletId: {tablet_id}, status: {code}, error: \
                 {}, retry after: {:?}, at coordinator: {coordinator}",
                response.error_description,
                sys.retry_interval
            );
            sys.retry_interval
        },
    };

    let prior_lag = table
        .partition(shard_idx)
        .ok_or_else(|| anyhow::anyhow!("In-flight shard {shard_idx} is not a partition"))?
        .last_cond_erase_lag;
    let table = catalog
        .table_mut(table_id)
        .ok_or_else(|| anyhow::anyhow!("Table {table_id} disappeared"))?;
    table.schedule_next_cond_erase(shard_idx, now, next)?;
    let new_lag = table
        .partition(shard_idx)
        .and_then(|p| p.last_cond_erase_lag)
        .unwrap_or_default();
    outcome.writes.extend(
        table
            .partition_record(table_id, shard_idx)
            .map(ScheduleWrite::Partition),
    );
    outcome
        .writes
        .extend(table.ttl_record(table_id).map(ScheduleWrite::Table));

    if system_views_enabled {
        outcome.stats_event = Some(TtlStatsEvent {
            table_id,
            shard_idx,
            last_run_time: now,
            rows_processed: response.stats.rows_processed,
            rows_erased: response.stats.rows_erased,
        });
    }
    outcome.lag_change = Some(LagChange {
        prior: prior_lag,
        new: new_lag,
    });
    outcome.rerun_table = Some(table_id);
    Ok(outcome)
}
