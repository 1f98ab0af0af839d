use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use metrics::log_counter;

use crate::metrics::log_errors_reported_total;

/// Log an error to tracing and Sentry.
/// This is the one point where we call into Sentry.
///
/// Other parts of codebase should not use the `sentry` crate directly!
pub async fn report_error(err: &mut anyhow::Error) {
    // Trace error before yield - since during shutdown, we won't be back.
    trace_error(err);

    // Yield in case this is during shutdown - at which point, errors being reported
    // explicitly aren't useful. Yielding allows tokio to complete a cancellation.
    tokio::task::yield_now().await;

    report_to_sentry(err);
}

fn trace_error(err: &anyhow::Error) {
    if let Some(label) = err.metric_server_error_label_value() {
        log_errors_reported_total(label);
    }
    let label = err.metric_status_label_value();
    let err_for_tracing = format!("{err:#}").replace('\n', "\\n");
    let full_msg = format!(
        "Caught {label} error (RUST_BACKTRACE=1 RUST_LOG=info,{}=debug for full trace): \
         {err_for_tracing}",
        module_path!()
    );
    if err.metric_server_error_label_value().is_some() {
        tracing::error!("{full_msg}");
    } else {
        tracing::warn!("{full_msg}");
    }
    tracing::debug!("{err:?}");
}

fn report_to_sentry(err: &anyhow::Error) {
    if let Some(e) = err.downcast_ref::<ErrorMetadata>()
        && let Some(counter) = e.custom_metric()
    {
        log_counter(counter, 1);
    }

    let Some(sentry_client) = sentry::Hub::current().client() else {
        tracing::debug!("Not reporting above error: Sentry is not configured");
        return;
    };
    if !sentry_client.is_enabled() {
        tracing::debug!("Not reporting above error: SENTRY_DSN not set.");
        return;
    }
    let Some(level) = err.should_report_to_sentry() else {
        tracing::debug!("Not reporting above error to sentry.");
        return;
    };
    let mut event = sentry::integrations::anyhow::event_from_error(err);
    event.level = level;
    event
        .tags
        .insert("short_msg".into(), err.short_msg().to_owned());
    let event_id = sentry::capture_event(event);
    tracing::error!(
        "Reporting above error to sentry with event_id {}",
        event_id.simple()
    );
}
