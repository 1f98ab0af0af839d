use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        LazyLock,
        Weak,
    },
    time::{
        Duration,
        SystemTime,
    },
};

use futures::{
    FutureExt,
    future::FusedFuture,
};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use tokio::runtime::Builder;

use super::{
    FutureHandle,
    Runtime,
};

/// Wall clock reading of every `TestRuntime` at creation.
pub static TEST_EPOCH: LazyLock<SystemTime> =
    LazyLock::new(|| SystemTime::UNIX_EPOCH + Duration::from_secs(1620198000)); // May 5th, 2021 :)

/// Owns a paused, single-threaded tokio runtime. Time only moves when every
/// task is idle (tokio auto-advance) or when a test calls `advance_time`, so
/// `system_time()` is fully deterministic.
pub struct TestDriver {
    tokio_runtime: Option<tokio::runtime::Runtime>,
    state: Arc<Mutex<TestRuntimeState>>,
}

impl TestDriver {
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    pub fn new_with_seed(seed: u64) -> Self {
        let tokio_runtime = Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("Failed to create Tokio runtime");
        let creation_time = {
            let _handle = tokio_runtime.enter();
            tokio::time::Instant::now()
        };
        Self {
            tokio_runtime: Some(tokio_runtime),
            state: Arc::new(Mutex::new(TestRuntimeState {
                rng: ChaCha12Rng::seed_from_u64(seed),
                creation_time,
            })),
        }
    }

    pub fn rt(&self) -> TestRuntime {
        TestRuntime {
            tokio_handle: self
                .tokio_runtime
                .as_ref()
                .expect("tokio_runtime disappeared?")
                .handle()
                .clone(),
            state: Arc::downgrade(&self.state),
        }
    }

    pub fn run_until<F: Future>(&self, f: F) -> F::Output {
        self.tokio_runtime
            .as_ref()
            .expect("tokio_runtime disappeared?")
            .block_on(f)
    }
}

impl Drop for TestDriver {
    fn drop(&mut self) {
        if let Some(rt) = self.tokio_runtime.take() {
            rt.shutdown_background();
        }
    }
}

struct TestRuntimeState {
    rng: ChaCha12Rng,
    creation_time: tokio::time::Instant,
}

#[derive(Clone)]
pub struct TestRuntime {
    tokio_handle: tokio::runtime::Handle,
    state: Weak<Mutex<TestRuntimeState>>,
}

impl TestRuntime {
    fn with_state<R>(&self, f: impl FnOnce(&mut TestRuntimeState) -> R) -> R {
        let state = self
            .state
            .upgrade()
            .expect("TestRuntime used after its TestDriver shut down");
        let mut state = state.lock();
        f(&mut state)
    }

    /// Move virtual time forward, firing any timers that come due.
    pub async fn advance_time(&self, duration: Duration) {
        tokio::time::advance(duration).await;
    }
}

impl Runtime for TestRuntime {
    type Rng = ChaCha12Rng;

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> FutureHandle {
        let handle = self.tokio_handle.spawn(f);
        FutureHandle { handle }
    }

    fn system_time(&self) -> SystemTime {
        let elapsed = self.with_state(|state| state.creation_time.elapsed());
        *TEST_EPOCH + elapsed
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R {
        self.with_state(|state| f(&mut state.rng))
    }
}
