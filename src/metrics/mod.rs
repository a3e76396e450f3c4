mod server;

use prometheus::{IntCounterVec, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the three things operators watch on this service:
// - RPC outcomes per operation
// - event publish attempts and failures
// - messages observed by the stream consumer, per partition
//
// All metrics are registered with one registry and scraped via /metrics.
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub rpc_handled: IntCounterVec,
    pub events_published: IntCounterVec,
    pub events_publish_failed: IntCounterVec,
    pub stream_messages_received: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rpc_handled = IntCounterVec::new(
            Opts::new("rpc_handled_total", "Total RPCs handled, by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(rpc_handled.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Total events delivered to the stream",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_publish_failed = IntCounterVec::new(
            Opts::new(
                "events_publish_failed_total",
                "Total events that could not be delivered to the stream",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(events_publish_failed.clone()))?;

        let stream_messages_received = IntCounterVec::new(
            Opts::new(
                "stream_messages_received_total",
                "Total messages observed by the stream consumer",
            ),
            &["partition"],
        )?;
        registry.register(Box::new(stream_messages_received.clone()))?;

        Ok(Self {
            registry,
            rpc_handled,
            events_published,
            events_publish_failed,
            stream_messages_received,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_rpc(&self, operation: &str, outcome: &str) {
        self.rpc_handled
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_publish(&self, event_type: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[event_type]).inc();
        } else {
            self.events_publish_failed
                .with_label_values(&[event_type])
                .inc();
        }
    }

    pub fn record_stream_message(&self, partition: i32) {
        self.stream_messages_received
            .with_label_values(&[&partition.to_string()])
            .inc();
    }

    /// Current failure count for one event type; used by tests.
    pub fn publish_failures(&self, event_type: &str) -> u64 {
        self.events_publish_failed
            .with_label_values(&[event_type])
            .get()
    }
}
