//! Per-sink drain counters, exposed in the OpenMetrics text format.

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::{Error, Result};

const REGISTRY_PREFIX: &str = "filesink";
const SINK_NAME_LABEL: &str = "sink";

const DRAIN_ATTEMPT: &str = "event_drain_attempt";
const DRAIN_SUCCESS: &str = "event_drain_success";
const EMPTY_POLL: &str = "empty_poll";
const DELIVERY_ERROR: &str = "delivery_error";

type Labels = Vec<(String, String)>;

/// Counts what a sink did with the events it tried to drain. Clones share the counters.
#[derive(Debug, Clone)]
pub struct SinkCounter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    labels: Labels,
    registry: Mutex<Registry>,
    drain_attempt: Family<Labels, Counter>,
    drain_success: Family<Labels, Counter>,
    empty_poll: Family<Labels, Counter>,
    delivery_error: Family<Labels, Counter>,
}

impl SinkCounter {
    pub fn new(sink_name: &str) -> Self {
        let inner = Inner {
            labels: vec![(SINK_NAME_LABEL.to_string(), sink_name.to_string())],
            registry: Mutex::new(Registry::with_prefix(REGISTRY_PREFIX)),
            drain_attempt: Family::default(),
            drain_success: Family::default(),
            empty_poll: Family::default(),
            delivery_error: Family::default(),
        };

        {
            let mut registry = inner.registry.lock();
            registry.register(
                DRAIN_ATTEMPT,
                "Number of events taken from the channel",
                inner.drain_attempt.clone(),
            );
            registry.register(
                DRAIN_SUCCESS,
                "Number of events written to the file and committed",
                inner.drain_success.clone(),
            );
            registry.register(
                EMPTY_POLL,
                "Number of process calls that found the channel empty",
                inner.empty_poll.clone(),
            );
            registry.register(
                DELIVERY_ERROR,
                "Number of process calls that failed and rolled back",
                inner.delivery_error.clone(),
            );
        }

        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inc_drain_attempt(&self) {
        self.counter(&self.inner.drain_attempt).inc();
    }

    pub(crate) fn inc_drain_success(&self) {
        self.counter(&self.inner.drain_success).inc();
    }

    pub(crate) fn inc_empty_poll(&self) {
        self.counter(&self.inner.empty_poll).inc();
    }

    pub(crate) fn inc_delivery_error(&self) {
        self.counter(&self.inner.delivery_error).inc();
    }

    pub fn drain_attempt(&self) -> u64 {
        self.counter(&self.inner.drain_attempt).get()
    }

    pub fn drain_success(&self) -> u64 {
        self.counter(&self.inner.drain_success).get()
    }

    pub fn empty_poll(&self) -> u64 {
        self.counter(&self.inner.empty_poll).get()
    }

    pub fn delivery_error(&self) -> u64 {
        self.counter(&self.inner.delivery_error).get()
    }

    /// Snapshot of all counters in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let registry = self.inner.registry.lock();
        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| Error::Io(format!("encoding sink metrics: {e}")))?;
        Ok(buffer)
    }

    fn counter(&self, family: &Family<Labels, Counter>) -> Counter {
        family.get_or_create(&self.inner.labels).clone()
    }
}
