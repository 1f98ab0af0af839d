use std::time::Duration;

use metrics::{
    MetricLabel,
    StatusTimer,
    log_counter,
    log_counter_with_labels,
    log_int_gauge_add_with_labels,
    register_coordinator_counter,
    register_coordinator_histogram,
    register_coordinator_int_gauge,
};

use crate::types::EraseStatus;

register_coordinator_histogram!(
    CONDITIONAL_ERASE_TX_SECONDS,
    "Time to execute and commit one conditional erase transaction",
    &["tx", "status"]
);
pub fn conditional_erase_tx_timer(tx: &'static str) -> StatusTimer {
    let mut timer = StatusTimer::new(&CONDITIONAL_ERASE_TX_SECONDS);
    timer.add_label(MetricLabel::new_const("tx", tx));
    timer
}

register_coordinator_counter!(
    CONDITIONAL_ERASE_REQUESTS_SENT_TOTAL,
    "Number of erase requests handed to the transport"
);
pub fn log_requests_sent(count: usize) {
    log_counter(&CONDITIONAL_ERASE_REQUESTS_SENT_TOTAL, count as u64);
}

register_coordinator_counter!(
    CONDITIONAL_ERASE_RESPONSES_TOTAL,
    "Erase responses reconciled, by status",
    &["status"]
);
pub fn log_response(status: EraseStatus) {
    let status: &'static str = status.into();
    log_counter_with_labels(
        &CONDITIONAL_ERASE_RESPONSES_TOTAL,
        1,
        vec![MetricLabel::new_const("status", status)],
    );
}

register_coordinator_counter!(
    CONDITIONAL_ERASE_STALE_RESPONSES_TOTAL,
    "Erase responses discarded because their shard no longer resolves",
    &["reason"]
);
pub fn log_stale_response(reason: &'static str) {
    log_counter_with_labels(
        &CONDITIONAL_ERASE_STALE_RESPONSES_TOTAL,
        1,
        vec![MetricLabel::new_const("reason", reason)],
    );
}

register_coordinator_counter!(
    CONDITIONAL_ERASE_ABANDONED_SHARDS_TOTAL,
    "In-flight shards returned to the schedule because they no longer resolve"
);
pub fn log_abandoned_shards(count: usize) {
    log_counter(&CONDITIONAL_ERASE_ABANDONED_SHARDS_TOTAL, count as u64);
}

register_coordinator_counter!(
    CONDITIONAL_ERASE_SKIPPED_TABLES_TOTAL,
    "Tables skipped during dispatch because their index mapping did not resolve"
);
pub fn log_skipped_table() {
    log_counter(&CONDITIONAL_ERASE_SKIPPED_TABLES_TOTAL, 1);
}

register_coordinator_int_gauge!(
    CONDITIONAL_ERASE_SHARDS_BY_LAG_TOTAL,
    "Number of partitions whose last erase pass ran this late",
    &["lag"]
);

const LAG_BUCKETS: [(u64, &str); 10] = [
    (0, "0s"),
    (15 * 60, "15m"),
    (30 * 60, "30m"),
    (60 * 60, "1h"),
    (3 * 60 * 60, "3h"),
    (6 * 60 * 60, "6h"),
    (12 * 60 * 60, "12h"),
    (24 * 60 * 60, "1d"),
    (2 * 24 * 60 * 60, "2d"),
    (7 * 24 * 60 * 60, "7d"),
];

/// Label of the smallest bucket that holds `lag`.
pub fn lag_bucket(lag: Duration) -> &'static str {
    let secs = lag.as_secs();
    LAG_BUCKETS
        .iter()
        .find(|(bound, _)| secs <= *bound)
        .map_or("inf", |(_, label)| label)
}

pub fn log_shard_lag_delta(lag: Duration, delta: i64) {
    log_int_gauge_add_with_labels(
        &CONDITIONAL_ERASE_SHARDS_BY_LAG_TOTAL,
        delta,
        vec![MetricLabel::new_const("lag", lag_bucket(lag))],
    );
}
