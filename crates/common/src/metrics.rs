use metrics::{
    MetricLabel,
    log_counter_with_labels,
    register_coordinator_counter,
};

register_coordinator_counter!(
    COMMON_ERRORS_REPORTED_TOTAL,
    "Count of errors reported to tracing and Sentry",
    &["type"]
);
pub fn log_errors_reported_total(label: &'static str) {
    log_counter_with_labels(
        &COMMON_ERRORS_REPORTED_TOTAL,
        1,
        vec![MetricLabel::new_const("type", label)],
    );
}
