use common::types::TabletId;

use crate::types::{
    EraseRequest,
    TtlStatsEvent,
};

/// Delivers erase requests to shard tablets. Fire-and-forget: the answer, if
/// any, comes back through the scheduler's response path.
pub trait EraseTransport: Send + Sync + 'static {
    fn send(&self, tablet_id: TabletId, request: EraseRequest);
}

/// Receives per-partition TTL statistics for the system views.
pub trait TtlStatsSink: Send + Sync + 'static {
    fn send(&self, event: TtlStatsEvent);
}

#[cfg(any(test, feature = "testing"))]
mod test_transport {
    use std::sync::Arc;

    use common::types::TabletId;
    use parking_lot::Mutex;

    use super::{
        EraseTransport,
        TtlStatsSink,
    };
    use crate::types::{
        EraseRequest,
        TtlStatsEvent,
    };

    /// Records every request instead of delivering it.
    #[derive(Clone, Default)]
    pub struct TestTransport {
        sent: Arc<Mutex<Vec<(TabletId, EraseRequest)>>>,
    }

    impl TestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Requests sent since the last call, in send order.
        pub fn take_sent(&self) -> Vec<(TabletId, EraseRequest)> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn take_sent_tablets(&self) -> Vec<TabletId> {
            self.take_sent().into_iter().map(|(t, _)| t).collect()
        }
    }

    impl EraseTransport for TestTransport {
        fn send(&self, tablet_id: TabletId, request: EraseRequest) {
            self.sent.lock().push((tablet_id, request));
        }
    }

    #[derive(Clone, Default)]
    pub struct TestStatsCollector {
        events: Arc<Mutex<Vec<TtlStatsEvent>>>,
    }

    impl TestStatsCollector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn take_events(&self) -> Vec<TtlStatsEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl TtlStatsSink for TestStatsCollector {
        fn send(&self, event: TtlStatsEvent) {
            self.events.lock().push(event);
        }
    }
}
#[cfg(any(test, feature = "testing"))]
pub use test_transport::{
    TestStatsCollector,
    TestTransport,
};
