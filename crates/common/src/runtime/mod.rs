//! Runtime trait for abstracting away OS-esque features and allow different
//! implementations for test, dev, prod, etc.

use std::{
    future::Future,
    ops::Add,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use futures::{
    FutureExt,
    future::{
        BoxFuture,
        FusedFuture,
    },
};
use rand::Rng;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
    de::Error as _,
    ser::Error as _,
};
use thiserror::Error;

pub mod prod;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Future canceled")]
    Canceled,
    #[error("Future panicked: {0:?}")]
    Panicked(anyhow::Error),
}

impl From<tokio::task::JoinError> for JoinError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            return JoinError::Canceled;
        }
        let panic = e.into_panic();
        let msg = match panic.downcast::<&'static str>() {
            Ok(s) => (*s).to_owned(),
            Err(panic) => match panic.downcast::<String>() {
                Ok(s) => *s,
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        JoinError::Panicked(anyhow::anyhow!(msg))
    }
}

pub trait SpawnHandle: Send + Sync {
    fn shutdown(&mut self);
    fn into_join_future(self) -> BoxFuture<'static, Result<(), JoinError>>;
}

/// Shutdown the associated future, preempting it at its next yield point, and
/// join on its result.
pub async fn shutdown_and_join(mut handle: impl SpawnHandle) -> anyhow::Result<()> {
    handle.shutdown();
    if let Err(e) = handle.into_join_future().await
        && !matches!(e, JoinError::Canceled)
    {
        return Err(e.into());
    }
    Ok(())
}

/// Handle to a future spawned on a tokio runtime. Shared by the prod and test
/// runtimes.
pub struct FutureHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SpawnHandle for FutureHandle {
    fn shutdown(&mut self) {
        self.handle.abort();
    }

    fn into_join_future(self) -> BoxFuture<'static, Result<(), JoinError>> {
        self.handle.map(|r| r.map_err(JoinError::from)).boxed()
    }
}

/// A Runtime can be considered somewhat like an operating system abstraction
/// for our codebase. Time, randomness and task spawning operate differently
/// between test and prod: we don't want `wait` to actually sleep in tests but
/// instead to advance virtual time. Code that reads the clock or spawns work
/// is parameterized by a runtime so tests control both.
pub trait Runtime: Clone + Sync + Send + 'static {
    /// Source of randomness associated with the runtime.
    type Rng: Rng;

    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>>;

    /// Spawn a future on the runtime's executor.
    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static)
    -> FutureHandle;

    /// Return (a potentially-virtualized) system time.
    fn system_time(&self) -> SystemTime;

    fn unix_timestamp(&self) -> UnixTimestamp {
        UnixTimestamp::floor_millis(
            self.system_time()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Use the runtime's source of randomness.
    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R;
}

/// Abstraction over a unix timestamp. Internally it stores a Duration since the
/// unix epoch, always a whole number of milliseconds: every constructor and
/// arithmetic operation drops the sub-millisecond part, so the persisted form
/// (whole milliseconds) round-trips exactly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UnixTimestamp(Duration);

impl UnixTimestamp {
    pub const EPOCH: UnixTimestamp = UnixTimestamp(Duration::ZERO);

    fn floor_millis(d: Duration) -> Self {
        UnixTimestamp(d - Duration::from_nanos(u64::from(d.subsec_nanos() % 1_000_000)))
    }

    pub fn from_millis(ms: u64) -> Self {
        UnixTimestamp(Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Self {
        UnixTimestamp(Duration::from_secs(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.0
    }

    pub fn as_ms_since_epoch(&self) -> anyhow::Result<u64> {
        Ok(u64::try_from(self.0.as_millis())?)
    }

    pub fn as_micros_since_epoch(&self) -> anyhow::Result<u64> {
        Ok(u64::try_from(self.0.as_micros())?)
    }

    pub fn checked_sub(&self, rhs: UnixTimestamp) -> Option<Duration> {
        self.0.checked_sub(rhs.0)
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(&self, earlier: UnixTimestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Move back by `duration`, stopping at the epoch.
    pub fn saturating_sub(&self, duration: Duration) -> UnixTimestamp {
        UnixTimestamp::floor_millis(self.0.saturating_sub(duration))
    }
}

impl Add<Duration> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, rhs: Duration) -> UnixTimestamp {
        UnixTimestamp::floor_millis(self.0.saturating_add(rhs))
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = self.as_ms_since_epoch().map_err(S::Error::custom)?;
        serializer.serialize_u64(ms)
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms = u64::deserialize(deserializer).map_err(D::Error::custom)?;
        Ok(UnixTimestamp::from_millis(ms))
    }
}
