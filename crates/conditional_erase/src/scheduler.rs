//! Runs erase transactions against the catalog.
//!
//! Each transaction executes against a private clone of the catalog. Its
//! schedule writes are committed through `SchedulePersistence`, and only then
//! is the clone installed and are side effects (sending requests, stats,
//! metrics) released. A failed commit leaves the catalog untouched.
//! Transactions that trigger follow-up work return it as a continuation,
//! which `execute` runs from a queue after the commit.

use std::{
    collections::VecDeque,
    mem,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};

use catalog::{
    Catalog,
    ScheduleWrite,
};
use common::runtime::Runtime;
use tokio::sync::Mutex;

use crate::{
    ConditionalEraseConfig,
    dispatcher::{
        DispatchOutcome,
        RunScope,
        run_due,
    },
    metrics::{
        conditional_erase_tx_timer,
        log_abandoned_shards,
        log_requests_sent,
        log_response,
        log_shard_lag_delta,
        log_skipped_table,
        log_stale_response,
    },
    persistence::SchedulePersistence,
    reconciler::{
        ReconcileOutcome,
        on_erase_response,
    },
    transport::{
        EraseTransport,
        TtlStatsSink,
    },
    types::EraseResponse,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionalEraseTx {
    /// Dispatch due partitions of every TTL-enabled table or of one table.
    RunDue(RunScope),
    /// Apply one erase response.
    Reconcile(EraseResponse),
}

impl ConditionalEraseTx {
    fn name(&self) -> &'static str {
        match self {
            ConditionalEraseTx::RunDue(_) => "run_conditional_erase",
            ConditionalEraseTx::Reconcile(_) => "schedule_conditional_erase",
        }
    }
}

enum Completion {
    Dispatch(DispatchOutcome),
    Reconcile(ReconcileOutcome),
}

pub struct ConditionalEraseScheduler<RT: Runtime> {
    runtime: RT,
    catalog: Arc<Mutex<Catalog>>,
    persistence: Arc<dyn SchedulePersistence>,
    transport: Arc<dyn EraseTransport>,
    stats_sink: Arc<dyn TtlStatsSink>,
    erase_enabled: Arc<AtomicBool>,
    system_views_enabled: bool,
}

impl<RT: Runtime> Clone for ConditionalEraseScheduler<RT> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            catalog: self.catalog.clone(),
            persistence: self.persistence.clone(),
            transport: self.transport.clone(),
            stats_sink: self.stats_sink.clone(),
            erase_enabled: self.erase_enabled.clone(),
            system_views_enabled: self.system_views_enabled,
        }
    }
}

impl<RT: Runtime> ConditionalEraseScheduler<RT> {
    pub fn new(
        runtime: RT,
        catalog: Catalog,
        persistence: Arc<dyn SchedulePersistence>,
        transport: Arc<dyn EraseTransport>,
        stats_sink: Arc<dyn TtlStatsSink>,
        config: &ConditionalEraseConfig,
    ) -> Self {
        Self {
            runtime,
            catalog: Arc::new(Mutex::new(catalog)),
            persistence,
            transport,
            stats_sink,
            erase_enabled: Arc::new(AtomicBool::new(config.erase_operations_enabled)),
            system_views_enabled: config.system_views_enabled,
        }
    }

    /// Turn erase operations on or off. While off, dispatch and
    /// reconciliation leave the schedule as it is.
    pub fn set_erase_operations_enabled(&self, enabled: bool) {
        self.erase_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn erase_operations_enabled(&self) -> bool {
        self.erase_enabled.load(Ordering::SeqCst)
    }

    /// A snapshot of the committed catalog.
    pub async fn catalog(&self) -> Catalog {
        self.catalog.lock().await.clone()
    }

    /// Run `tx` and every continuation it produces. Transactions before a
    /// failed one stay committed; callers that retry should drive
    /// `execute_one` so only the failed transaction is run again.
    pub async fn execute(&self, tx: ConditionalEraseTx) -> anyhow::Result<()> {
        let mut queue = VecDeque::from([tx]);
        while let Some(tx) = queue.pop_front() {
            if let Some(next) = self.execute_one(tx).await? {
                queue.push_back(next);
            }
        }
        Ok(())
    }

    /// Run a single transaction. On success returns the continuation to run
    /// next, if any; on error nothing was committed.
    pub async fn execute_one(
        &self,
        tx: ConditionalEraseTx,
    ) -> anyhow::Result<Option<ConditionalEraseTx>> {
        let timer = conditional_erase_tx_timer(tx.name());
        let now = self.runtime.unix_timestamp();
        let erase_enabled = self.erase_operations_enabled();

        let (coordinator, completion) = {
            let mut catalog = self.catalog.lock().await;
            let coordinator = catalog.owner_id();
            tracing::info!("{} execute, at coordinator: {coordinator}", tx.name());
            let mut working = catalog.clone();
            let (completion, writes) = match &tx {
                ConditionalEraseTx::RunDue(scope) => {
                    let mut outcome = run_due(&mut working, *scope, now, erase_enabled)?;
                    let writes = mem::take(&mut outcome.writes);
                    (Completion::Dispatch(outcome), writes)
                },
                ConditionalEraseTx::Reconcile(response) => {
                    log_response(response.status);
                    let mut outcome = on_erase_response(
                        &mut working,
                        response,
                        now,
                        erase_enabled,
                        self.system_views_enabled,
                    )?;
                    let writes = mem::take(&mut outcome.writes);
                    (Completion::Reconcile(outcome), writes)
                },
            };
            if !writes.is_empty() {
                self.persistence.write(writes).await?;
            }
            *catalog = working;
            (coordinator, completion)
        };

        tracing::info!("{} complete, at coordinator: {coordinator}", tx.name());
        let next = match completion {
            Completion::Dispatch(outcome) => {
                log_requests_sent(outcome.requests.len());
                log_abandoned_shards(outcome.abandoned);
                for _ in 0..outcome.skipped_tables {
                    log_skipped_table();
                }
                for (tablet_id, request) in outcome.requests {
                    tracing::debug!(
                        "Run conditional erase, tabletId: {tablet_id}, request: {request:?}, at \
                         coordinator: {coordinator}"
                    );
                    self.transport.send(tablet_id, request);
                }
                None
            },
            Completion::Reconcile(outcome) => {
                if let Some(reason) = outcome.stale {
                    log_stale_response(reason.into());
                }
                if let Some(lag) = outcome.lag_change {
                    if let Some(prior) = lag.prior {
                        log_shard_lag_delta(prior, -1);
                    }
                    log_shard_lag_delta(lag.new, 1);
                }
                if let Some(event) = outcome.stats_event {
                    self.stats_sink.send(event);
                }
                outcome
                    .rerun_table
                    .map(|table_id| ConditionalEraseTx::RunDue(RunScope::Table(table_id)))
            },
        };
        timer.finish();
        Ok(next)
    }

    /// Apply a catalog change (DDL) under the same commit protocol as erase
    /// transactions. `f` returns its result and the schedule writes to commit.
    pub async fn mutate_catalog<T>(
        &self,
        f: impl FnOnce(&mut Catalog) -> anyhow::Result<(T, Vec<ScheduleWrite>)>,
    ) -> anyhow::Result<T> {
        let mut catalog = self.catalog.lock().await;
        let mut working = catalog.clone();
        let (result, writes) = f(&mut working)?;
        let removed_lags: Vec<_> = writes
            .iter()
            .filter_map(|write| match write {
                ScheduleWrite::DeletePartition {
                    table_id,
                    shard_idx,
                } => catalog
                    .table(*table_id)?
                    .partition(*shard_idx)?
                    .last_cond_erase_lag,
                _ => None,
            })
            .collect();
        if !writes.is_empty() {
            self.persistence.write(writes).await?;
        }
        *catalog = working;
        drop(catalog);
        for lag in removed_lags {
            log_shard_lag_delta(lag, -1);
        }
        Ok(result)
    }

    /// Rebuild the schedule from persistence. Call once at startup, after the
    /// catalog topology is loaded and before any erase transaction.
    pub async fn restore(&self) -> anyhow::Result<()> {
        let snapshot = self.persistence.load().await?;
        let mut catalog = self.catalog.lock().await;
        let mut working = catalog.clone();
        working.restore_schedule(snapshot)?;
        let lags: Vec<_> = working
            .ttl_enabled_tables()
            .filter_map(|table_id| working.table(table_id))
            .flat_map(|table| table.partitions().iter())
            .filter_map(|partition| partition.last_cond_erase_lag)
            .collect();
        *catalog = working;
        drop(catalog);
        for lag in lags {
            log_shard_lag_delta(lag, 1);
        }
        Ok(())
    }
}
