//! Code for interacting with our metrics logging

mod labels;
mod metrics;
mod reporting;
mod timer;

pub use crate::{
    labels::*,
    metrics::*,
    reporting::{
        get_desc,
        log_counter,
        log_counter_with_labels,
        log_distribution_with_labels,
        log_int_gauge_add_with_labels,
    },
    timer::StatusTimer,
};
pub use paste::paste;
pub use prometheus;

/// Register a labeled histogram with the coordinator metrics registry and
/// store in a static variable. The reported metric name will be the lower_snake_case version of the
/// declared variable name.
#[macro_export]
macro_rules! register_coordinator_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::HistogramVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name!(stringify!([<$NAME:lower>]));
                }
                let help = $crate::metric_help!($HELP);
                $crate::prometheus::register_histogram_vec_with_registry!(
                    &*name,
                    &*help,
                    $LABELS,
                    $crate::COORDINATOR_METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register an integer counter with the coordinator metrics registry and
/// store in a static variable.
/// An optional third argument allows specifying labels for this metric.
#[macro_export]
macro_rules! register_coordinator_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name!(stringify!([<$NAME:lower>]));
                }
                let help = $crate::metric_help!($HELP);
                $crate::prometheus::register_int_counter_with_registry!(
                    &*name,
                    &*help,
                    $crate::COORDINATOR_METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name!(stringify!([<$NAME:lower>]));
                }
                let help = $crate::metric_help!($HELP);
                $crate::prometheus::register_int_counter_vec_with_registry!(
                    &*name,
                    &*help,
                    $LABELS,
                    $crate::COORDINATOR_METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register an integer gauge that is adjusted up and down by label, e.g. a
/// count of items per bucket.
#[macro_export]
macro_rules! register_coordinator_int_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGaugeVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name!(stringify!([<$NAME:lower>]));
                }
                let help = $crate::metric_help!($HELP);
                $crate::prometheus::register_int_gauge_vec_with_registry!(
                    &*name,
                    &*help,
                    $LABELS,
                    $crate::COORDINATOR_METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}
