use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Event, EventPublisher, PublishError};
use crate::metrics::Metrics;

// ============================================================================
// Publish Queue
// ============================================================================
//
// Handlers never publish on the request hot path. They hand the event to a
// bounded in-process queue and return; a single worker task drains the queue
// and performs the actual stream send. A slow or unavailable broker can
// therefore delay delivery but not a response. Delivery is eventual and is
// not ordered with respect to the store write that produced the event.
//
// ============================================================================

pub struct QueuedEventPublisher {
    tx: mpsc::Sender<(String, Event)>,
}

impl QueuedEventPublisher {
    /// Spawn the drain worker and return the queue handle. The worker runs
    /// until every handle is dropped and the queue is empty.
    pub fn start(inner: Arc<dyn EventPublisher>, capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, Event)>(capacity);

        tokio::spawn(async move {
            while let Some((topic, event)) = rx.recv().await {
                let event_type = event.event_type.clone();
                match inner.send_event(&topic, event).await {
                    Ok(()) => metrics.record_publish(&event_type, true),
                    Err(error) => {
                        metrics.record_publish(&event_type, false);
                        tracing::error!(
                            %error,
                            topic = %topic,
                            event_type = %event_type,
                            "failed to publish queued event"
                        );
                    }
                }
            }
            tracing::debug!("event queue closed");
        });

        Self { tx }
    }
}

#[async_trait]
impl EventPublisher for QueuedEventPublisher {
    /// Enqueue without blocking. A full queue drops the event; that is a
    /// publish failure and publish failures never affect the caller's
    /// primary outcome.
    async fn send_event(&self, topic: &str, event: Event) -> Result<(), PublishError> {
        self.tx
            .try_send((topic.to_string(), event))
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PublishError::QueueClosed,
            })
    }
}
