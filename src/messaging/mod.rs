mod consumer;
mod producer;
mod queue;

pub use consumer::EventStreamConsumer;
pub use producer::KafkaEventPublisher;
pub use queue::QueuedEventPublisher;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Event Stream Messaging
// ============================================================================
//
// One notification event is produced per successful RPC and handed to an
// external stream. Events are transient: once sent, the stream owns them.
// Nothing in this service reads its own events back; the consumer below
// exists to supervise the serving loop, not to process payloads.
//
// ============================================================================

/// Every event is published under the same partition key, so downstream
/// consumers see the notification feed as a single ordered sequence.
pub const EVENT_PARTITION_KEY: &str = "key";

/// Notification envelope for one successful operation.
///
/// `timestamp` comes from the handler's clock rather than the producer, so
/// tests can pin it. `request_body` carries the serialized request for
/// mutations that have a payload worth auditing and is empty otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub request_body: String,
}

impl Event {
    /// Wire format expected by downstream systems. Opaque to this service.
    pub fn encode(&self) -> String {
        format!(
            "EventType: {}, EventRequestBody: {}, EventTime: {}",
            self.event_type, self.request_body, self.timestamp
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to send event to the stream: {0}")]
    Transport(String),

    #[error("event queue is full")]
    QueueFull,

    #[error("event queue is closed")]
    QueueClosed,
}

/// Fire-and-forget delivery of one event to a named stream. One attempt, no
/// retry, no buffering beyond what the transport itself provides; the error
/// is returned to the caller for logging only.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn send_event(&self, topic: &str, event: Event) -> Result<(), PublishError>;
}

/// Tie the serving loop's lifetime to the consume loop: whenever `consume`
/// returns, for any reason, the shutdown token fires and the gRPC server
/// stops accepting requests. The token is owned by `main`, which also wires
/// the interrupt signal into it; the consumer is one shutdown source among
/// several, not a hidden side effect.
pub async fn supervise_serving<F>(consume: F, shutdown: CancellationToken)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match consume.await {
        Ok(()) => tracing::info!("event stream consumer finished"),
        Err(error) => tracing::error!(%error, "event stream consumer failed"),
    }
    shutdown.cancel();
}
