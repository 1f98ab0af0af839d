//! The coordinator's Prometheus registry and the naming rules every metric
//! registered in it must follow.
//!
//! A metric name is `<stem><unit>`: ASCII alphanumerics and underscores,
//! ending in one of `UNIT_SUFFIXES`. The registry prefixes every name with
//! `SERVICE_NAME`. Names and help strings are checked in const context by the
//! `register_coordinator_*!` macros, so a bad name fails the build.
//!
//! Crates keep their metrics in a private `metrics` module and export
//! functions named for events ("a shard was dispatched"), not for metrics.
use std::{
    collections::HashSet,
    env,
    ops::Deref,
    sync::LazyLock,
};

use parking_lot::Mutex;
use prometheus::Registry;

use crate::{
    MetricLabel,
    log_counter_with_labels,
    register_coordinator_counter,
};

/// Units a metric name may end with. `_total` is the unit-less count and
/// `_info` the unit-less gauge.
pub const UNIT_SUFFIXES: &[&str] = &[
    "_seconds",
    "_bytes",
    "_rows",
    "_shards",
    "_tables",
    "_transactions",
    "_requests",
    "_responses",
    "_errors",
    "_writes",
    "_operations",
    "_total",
    "_info",
];

const DEFAULT_SERVICE_NAME: &str = "coordinator";

/// Name of the running executable with every character Prometheus rejects
/// replaced by `_`.
pub static SERVICE_NAME: LazyLock<String> = LazyLock::new(|| {
    let exe = env::current_exe().ok();
    let stem = exe
        .as_deref()
        .and_then(|path| path.file_name())
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_SERVICE_NAME);
    sanitize_service_name(stem)
});

fn sanitize_service_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub static COORDINATOR_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let instance = env::var("COORDINATOR_INSTANCE")
        .ok()
        .map(|instance| [("instance_name".to_owned(), instance)].into());
    Registry::new_custom(Some(SERVICE_NAME.clone()), instance).unwrap_or_else(|e| {
        tracing::error!("Invalid metrics registry settings, metrics are unprefixed: {e}");
        Registry::new()
    })
});

/// Why `check_metric_name` rejected a name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidMetricName {
    /// Byte offset of the first character outside `[A-Za-z0-9_]`.
    BadCharacter(usize),
    /// The name is not a nonempty stem followed by a unit suffix.
    MissingUnit,
}

/// True if `name` is longer than `unit` and ends with it.
const fn has_unit(name: &[u8], unit: &[u8]) -> bool {
    if name.len() <= unit.len() {
        return false;
    }
    let mut back = 1;
    while back <= unit.len() {
        if name[name.len() - back] != unit[unit.len() - back] {
            return false;
        }
        back += 1;
    }
    true
}

pub const fn check_metric_name(name: &str) -> Result<(), InvalidMetricName> {
    let bytes = name.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let c = bytes[pos];
        if !c.is_ascii_alphanumeric() && c != b'_' {
            return Err(InvalidMetricName::BadCharacter(pos));
        }
        pos += 1;
    }
    let mut unit = 0;
    while unit < UNIT_SUFFIXES.len() {
        if has_unit(bytes, UNIT_SUFFIXES[unit].as_bytes()) {
            return Ok(());
        }
        unit += 1;
    }
    Err(InvalidMetricName::MissingUnit)
}

/// A metric name that passed `check_metric_name`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MetricName(&'static str);

impl MetricName {
    pub const fn new(name: &'static str) -> Self {
        match check_metric_name(name) {
            Ok(()) => Self(name),
            Err(InvalidMetricName::BadCharacter(_)) => {
                panic!("Metric names may only contain ASCII alphanumerics and underscores")
            },
            Err(InvalidMetricName::MissingUnit) => {
                panic!("Metric names must be a stem followed by a unit from UNIT_SUFFIXES")
            },
        }
    }
}

impl Deref for MetricName {
    type Target = str;

    fn deref(&self) -> &str {
        self.0
    }
}

/// Evaluates `MetricName::new` in a const item, so a bad name is a compile
/// error rather than a panic on first use.
#[macro_export]
macro_rules! metric_name {
    ($name: expr) => {{
        const NAME: $crate::MetricName = $crate::MetricName::new($name);
        NAME
    }};
}

/// Nonempty help text for a metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricHelp(&'static str);

impl MetricHelp {
    pub const fn new(help: &'static str) -> Self {
        assert!(!help.is_empty(), "Metric help must not be empty");
        Self(help)
    }
}

impl Deref for MetricHelp {
    type Target = str;

    fn deref(&self) -> &str {
        self.0
    }
}

#[macro_export]
macro_rules! metric_help {
    ($help: literal) => {{
        const HELP: $crate::MetricHelp = $crate::MetricHelp::new($help);
        HELP
    }};
}

register_coordinator_counter!(
    INVALID_METRIC_TOTAL,
    "Count of metrics that failed to be reported",
    &["metric_name"]
);

/// Metrics that already failed once. A bad label set fails on every call,
/// so each one goes to Sentry only the first time.
static FAILED_METRICS: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

pub fn log_invalid_metric(name: String, error: prometheus::Error) {
    log_counter_with_labels(
        &INVALID_METRIC_TOTAL,
        1,
        vec![MetricLabel::new("metric_name", name.clone())],
    );
    let msg = format!("Failed to record metric {name:?}: {error}");
    if !FAILED_METRICS.lock().insert(name) {
        return;
    }
    if cfg!(any(test, feature = "testing")) {
        panic!("{msg}");
    }
    let err = anyhow::anyhow!(error).context(msg);
    tracing::error!("{err:?}");
    sentry::integrations::anyhow::capture_anyhow(&err);
}
