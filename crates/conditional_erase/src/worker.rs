use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use common::{
    backoff::Backoff,
    errors::report_error,
    runtime::{
        FutureHandle,
        Runtime,
        SpawnHandle,
    },
};
use futures::{
    FutureExt,
    future::Fuse,
    pin_mut,
    select_biased,
};
use parking_lot::Mutex;
use tokio::sync::{
    mpsc,
    oneshot,
};

use crate::{
    ConditionalEraseConfig,
    dispatcher::RunScope,
    scheduler::{
        ConditionalEraseScheduler,
        ConditionalEraseTx,
    },
    types::EraseResponse,
};

const RESPONSE_QUEUE_SIZE: usize = 1024;

/// Background loop that restores the schedule, dispatches every
/// `run_interval` and reconciles responses as they arrive.
pub struct ConditionalEraseWorker<RT: Runtime> {
    runtime: RT,
    scheduler: ConditionalEraseScheduler<RT>,
    responses: mpsc::Receiver<EraseResponse>,
    run_interval: Duration,
    backoff: Backoff,
}

struct Inner {
    handle: FutureHandle,
    cancel_sender: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct ConditionalEraseClient {
    inner: Arc<Mutex<Option<Inner>>>,
    responses: mpsc::Sender<EraseResponse>,
}

impl<RT: Runtime> ConditionalEraseWorker<RT> {
    pub fn start(
        runtime: RT,
        scheduler: ConditionalEraseScheduler<RT>,
        config: &ConditionalEraseConfig,
    ) -> ConditionalEraseClient {
        let (response_sender, response_receiver) = mpsc::channel(RESPONSE_QUEUE_SIZE);
        let worker = Self {
            runtime: runtime.clone(),
            scheduler,
            responses: response_receiver,
            run_interval: config.run_interval,
            backoff: Backoff::new(config.worker_initial_backoff, config.worker_max_backoff),
        };
        let (cancel_sender, cancel_receiver) = oneshot::channel();
        let handle = runtime.spawn("conditional_erase_worker", worker.go(cancel_receiver));
        ConditionalEraseClient {
            inner: Arc::new(Mutex::new(Some(Inner {
                handle,
                cancel_sender,
            }))),
            responses: response_sender,
        }
    }

    async fn go(mut self, cancel_receiver: oneshot::Receiver<()>) {
        tracing::info!("Starting conditional erase worker");
        let cancel_fut = cancel_receiver.fuse();
        pin_mut!(cancel_fut);

        loop {
            match self.scheduler.restore().await {
                Ok(()) => break,
                Err(mut e) => {
                    report_error(&mut e).await;
                    if !self.backoff_or_cancel(&mut cancel_fut).await {
                        return;
                    }
                },
            }
        }
        self.backoff.reset();

        let mut pending = VecDeque::from([ConditionalEraseTx::RunDue(RunScope::All)]);
        let mut tick = self.runtime.wait(self.run_interval);
        loop {
            while let Some(tx) = pending.pop_front() {
                let is_run_all = tx == ConditionalEraseTx::RunDue(RunScope::All);
                match self.scheduler.execute_one(tx.clone()).await {
                    Ok(next) => {
                        self.backoff.reset();
                        // A continuation runs before anything queued behind it.
                        if let Some(next) = next {
                            pending.push_front(next);
                        }
                        if is_run_all {
                            tick = self.runtime.wait(self.run_interval);
                        }
                    },
                    Err(mut e) => {
                        report_error(&mut e).await;
                        pending.push_front(tx);
                        if !self.backoff_or_cancel(&mut cancel_fut).await {
                            return;
                        }
                    },
                }
            }
            select_biased! {
                _ = cancel_fut => {
                    tracing::info!("Shutting down conditional erase worker...");
                    break;
                },
                response = self.responses.recv().fuse() => match response {
                    Some(response) => {
                        pending.push_back(ConditionalEraseTx::Reconcile(response));
                    },
                    None => {
                        tracing::info!("All conditional erase clients dropped, stopping worker");
                        break;
                    },
                },
                _ = tick => pending.push_back(ConditionalEraseTx::RunDue(RunScope::All)),
            }
        }
    }

    /// Sleep for the next backoff interval. Returns false if canceled first.
    async fn backoff_or_cancel(
        &mut self,
        mut cancel_fut: &mut std::pin::Pin<&mut Fuse<oneshot::Receiver<()>>>,
    ) -> bool {
        let delay = self.runtime.with_rng(|rng| self.backoff.fail(rng));
        tracing::info!(
            "Conditional erase worker backing off for {delay:?} after {} failures",
            self.backoff.failures()
        );
        let wait_fut = self.runtime.wait(delay);
        select_biased! {
            _ = cancel_fut => {
                tracing::info!("Shutting down conditional erase worker...");
                false
            },
            _ = wait_fut.fuse() => true,
        }
    }
}

impl ConditionalEraseClient {
    /// Hand an erase response to the worker.
    pub async fn deliver(&self, response: EraseResponse) -> anyhow::Result<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| anyhow::anyhow!("Conditional erase worker is shut down"))
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let inner = { self.inner.lock().take() };
        if let Some(inner) = inner {
            let _ = inner.cancel_sender.send(());
            inner.handle.into_join_future().await?;
        }
        Ok(())
    }
}
