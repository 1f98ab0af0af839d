use std::{
    collections::BTreeSet,
    mem,
    time::{
        Duration,
        Instant,
    },
};

use prometheus::HistogramVec;

use crate::{
    MetricLabel,
    get_desc,
    log_distribution_with_labels,
};

/// Status timer that defaults to error unless `.finish()` is explicitly called
/// upon success.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    labels: BTreeSet<MetricLabel>,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        let mut labels = BTreeSet::new();
        labels.insert(MetricLabel::STATUS_ERROR);
        Self {
            start: Instant::now(),
            histogram,
            labels,
        }
    }

    pub fn add_label(&mut self, label: MetricLabel) {
        self.labels.insert(label);
    }

    /// Finish the timer with status success
    pub fn finish(mut self) -> Duration {
        self.labels.remove(&MetricLabel::STATUS_ERROR);
        self.labels.insert(MetricLabel::STATUS_SUCCESS);
        self.start.elapsed()
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        tracing::debug!(
            "{elapsed:?} for timer {:?} {:?}",
            get_desc(self.histogram),
            self.labels
        );
        let labels = mem::take(&mut self.labels);
        log_distribution_with_labels(
            self.histogram,
            elapsed.as_secs_f64(),
            labels.into_iter().collect(),
        );
    }
}
