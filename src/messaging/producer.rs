use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};

use super::{Event, EventPublisher, PublishError, EVENT_PARTITION_KEY};

/// Kafka-backed publisher shared by every handler invocation. One producer
/// connection for the process; sends are single-attempt and synchronous.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|error| PublishError::Transport(error.to_string()))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn send_event(&self, topic: &str, event: Event) -> Result<(), PublishError> {
        let payload = event.encode();
        let record = FutureRecord::to(topic)
            .key(EVENT_PARTITION_KEY)
            .payload(&payload);

        self.producer
            .send(record, rdkafka::util::Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(error, _)| PublishError::Transport(error.to_string()))?;

        tracing::debug!(
            topic = %topic,
            event_type = %event.event_type,
            "event delivered to stream"
        );
        Ok(())
    }
}
