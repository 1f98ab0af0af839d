use async_trait::async_trait;
use catalog::{
    ScheduleSnapshot,
    ScheduleWrite,
};

/// Durable storage for the erase schedule. `write` must apply all of its
/// writes or none of them.
#[async_trait]
pub trait SchedulePersistence: Send + Sync + 'static {
    async fn write(&self, writes: Vec<ScheduleWrite>) -> anyhow::Result<()>;

    async fn load(&self) -> anyhow::Result<ScheduleSnapshot>;
}

#[cfg(any(test, feature = "testing"))]
mod test_persistence {
    use std::sync::Arc;

    use async_trait::async_trait;
    use catalog::{
        ScheduleSnapshot,
        ScheduleWrite,
    };
    use parking_lot::Mutex;

    use super::SchedulePersistence;

    #[derive(Default)]
    struct Inner {
        snapshot: ScheduleSnapshot,
        fail_writes: bool,
        /// Writes to let through before failing exactly one.
        fail_after: Option<usize>,
        commits: usize,
    }

    /// In-memory persistence whose writes can be made to fail.
    #[derive(Clone, Default)]
    pub struct TestSchedulePersistence {
        inner: Arc<Mutex<Inner>>,
    }

    impl TestSchedulePersistence {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.inner.lock().fail_writes = fail;
        }

        /// Let the next `successes` writes commit, then fail one write.
        pub fn fail_one_write_after(&self, successes: usize) {
            self.inner.lock().fail_after = Some(successes);
        }

        pub fn snapshot(&self) -> ScheduleSnapshot {
            self.inner.lock().snapshot.clone()
        }

        pub fn commits(&self) -> usize {
            self.inner.lock().commits
        }
    }

    #[async_trait]
    impl SchedulePersistence for TestSchedulePersistence {
        async fn write(&self, writes: Vec<ScheduleWrite>) -> anyhow::Result<()> {
            let mut inner = self.inner.lock();
            anyhow::ensure!(!inner.fail_writes, "Injected schedule write failure");
            match inner.fail_after {
                Some(0) => {
                    inner.fail_after = None;
                    anyhow::bail!("Injected schedule write failure");
                },
                Some(n) => inner.fail_after = Some(n - 1),
                None => {},
            }
            inner.snapshot.apply(writes);
            inner.commits += 1;
            Ok(())
        }

        async fn load(&self) -> anyhow::Result<ScheduleSnapshot> {
            Ok(self.inner.lock().snapshot.clone())
        }
    }
}
#[cfg(any(test, feature = "testing"))]
pub use test_persistence::TestSchedulePersistence;
