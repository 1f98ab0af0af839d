//! Tunable limits and parameters for the coordinator.
//!
//! Every knob here can be overridden with an environment variable of the same
//! name. Each knob documents what it's for and the bounds an operator should
//! stay within when adjusting it.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config;

/// Set a consistent thread stack size regardless of environment. This is
/// 2x Rust's default: https://doc.rust-lang.org/nightly/std/thread/index.html#stack-size
pub static RUNTIME_STACK_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_STACK_SIZE", 4 * 1024 * 1024));

/// 0 -> default (number of cores)
pub static RUNTIME_WORKER_THREADS: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_WORKER_THREADS", 0));

/// Global switch for TTL-driven conditional erase. When off, neither
/// dispatching nor reconciling does anything; schedules are left untouched
/// so turning it back on resumes where it stopped.
pub static TTL_ERASE_OPERATIONS_ENABLED: LazyLock<bool> =
    LazyLock::new(|| env_config("TTL_ERASE_OPERATIONS_ENABLED", true));

/// How often the background worker runs a dispatch pass over every
/// TTL-enabled table. Reconciliations trigger table-scoped passes in between,
/// so this mostly bounds how late a partition whose due time passed while idle
/// gets picked up.
pub static TTL_ERASE_RUN_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("TTL_ERASE_RUN_INTERVAL_SECS", 60)));

/// Emit per-partition TTL statistics events after each reconciled erase.
pub static TTL_ERASE_SYSTEM_VIEWS_ENABLED: LazyLock<bool> =
    LazyLock::new(|| env_config("TTL_ERASE_SYSTEM_VIEWS_ENABLED", false));

/// Initial backoff for the erase worker after a failed transaction commit.
pub static TTL_ERASE_WORKER_INITIAL_BACKOFF: LazyLock<Duration> = LazyLock::new(|| {
    Duration::from_millis(env_config("TTL_ERASE_WORKER_INITIAL_BACKOFF_MS", 100))
});

/// Maximum backoff for the erase worker after repeated commit failures.
pub static TTL_ERASE_WORKER_MAX_BACKOFF: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("TTL_ERASE_WORKER_MAX_BACKOFF_SECS", 60)));

/// Default interval between successful erase passes on one partition, used
/// when a TTL policy does not set its own.
pub static TTL_DEFAULT_RUN_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("TTL_DEFAULT_RUN_INTERVAL_SECS", 3600)));

/// Default delay before retrying a partition whose erase pass failed.
pub static TTL_DEFAULT_RETRY_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("TTL_DEFAULT_RETRY_INTERVAL_SECS", 300)));

/// Default byte limit of one erase batch on a shard.
pub static TTL_DEFAULT_BATCH_MAX_BYTES: LazyLock<u64> =
    LazyLock::new(|| env_config("TTL_DEFAULT_BATCH_MAX_BYTES", 512000));

/// Default minimum keys per erase batch. Must be <= the max.
pub static TTL_DEFAULT_BATCH_MIN_KEYS: LazyLock<u64> =
    LazyLock::new(|| env_config("TTL_DEFAULT_BATCH_MIN_KEYS", 2));

/// Default maximum keys per erase batch.
pub static TTL_DEFAULT_BATCH_MAX_KEYS: LazyLock<u64> =
    LazyLock::new(|| env_config("TTL_DEFAULT_BATCH_MAX_KEYS", 256));

/// Default cap on partitions of one table with an erase in flight.
/// 0 means unbounded.
pub static TTL_DEFAULT_MAX_SHARDS_IN_FLIGHT: LazyLock<u32> =
    LazyLock::new(|| env_config("TTL_DEFAULT_MAX_SHARDS_IN_FLIGHT", 0));
