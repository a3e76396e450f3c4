use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

// ============================================================================
// Event Stream Consumer
// ============================================================================
//
// Reads every partition of the notification topic from the newest offset,
// one reader task per partition, for the lifetime of the service. Message
// handling is deliberately just logging: the consumer exists so that the end
// of consumption, however it happens, is observable to the process
// supervisor, which treats it as the signal to stop serving.
//
// Failure semantics: anything that goes wrong before the readers are running
// (metadata fetch, reader creation, partition assignment) fails the whole
// consume call immediately. Once the readers are up, one partition's read
// error only ends that reader; consume returns when all of them are done.
//
// ============================================================================

pub struct EventStreamConsumer {
    brokers: String,
    group_id: String,
    metrics: Arc<Metrics>,
}

impl EventStreamConsumer {
    pub fn new(brokers: &str, group_id: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            brokers: brokers.to_string(),
            group_id: group_id.to_string(),
            metrics,
        }
    }

    /// Read `topic` across all partitions until cancelled or until every
    /// reader has stopped on its own.
    pub async fn consume(&self, topic: &str, cancel: CancellationToken) -> Result<()> {
        let partitions = self.partitions(topic)?;
        tracing::info!(
            topic = %topic,
            partition_count = partitions.len(),
            "starting partition readers"
        );

        // Open every reader before spawning any of them; a single failure
        // here aborts the consume call with nothing left running.
        let mut readers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            readers.push((partition, self.partition_reader(topic, partition)?));
        }

        let handles: Vec<_> = readers
            .into_iter()
            .map(|(partition, reader)| {
                let topic = topic.to_string();
                let cancel = cancel.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(read_partition(reader, topic, partition, cancel, metrics))
            })
            .collect();

        join_all(handles).await;
        tracing::info!(topic = %topic, "all partition readers stopped");
        Ok(())
    }

    fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let probe: StreamConsumer = self
            .client_config()
            .create()
            .context("failed to create metadata probe for the event stream")?;

        let metadata = probe
            .fetch_metadata(Some(topic), Duration::from_secs(10))
            .context("failed to fetch event stream metadata")?;

        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .with_context(|| format!("topic {topic} is missing from broker metadata"))?;

        if let Some(error) = topic_metadata.error() {
            bail!("broker reported an error for topic {topic}: {error:?}");
        }

        Ok(topic_metadata
            .partitions()
            .iter()
            .map(|p| p.id())
            .collect())
    }

    fn partition_reader(&self, topic: &str, partition: i32) -> Result<StreamConsumer> {
        let reader: StreamConsumer = self
            .client_config()
            .create()
            .with_context(|| format!("failed to create reader for partition {partition}"))?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::End)
            .with_context(|| format!("failed to build assignment for partition {partition}"))?;
        reader
            .assign(&assignment)
            .with_context(|| format!("failed to assign partition {partition}"))?;

        Ok(reader)
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "6000");
        config
    }
}

/// One partition's read loop. Exits on cancellation or on a read error;
/// errors here are terminal for this reader only.
async fn read_partition(
    reader: StreamConsumer,
    topic: String,
    partition: i32,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(topic = %topic, partition, "partition reader cancelled");
                break;
            }
            received = reader.recv() => match received {
                Ok(message) => {
                    metrics.record_stream_message(partition);
                    match message.payload_view::<str>() {
                        Some(Ok(payload)) => tracing::info!(
                            topic = %topic,
                            partition,
                            offset = message.offset(),
                            payload,
                            "received stream event"
                        ),
                        Some(Err(_)) => tracing::warn!(
                            topic = %topic,
                            partition,
                            offset = message.offset(),
                            "received non-utf8 stream event"
                        ),
                        None => tracing::warn!(
                            topic = %topic,
                            partition,
                            offset = message.offset(),
                            "received stream event without payload"
                        ),
                    }
                }
                Err(error) => {
                    tracing::error!(%error, topic = %topic, partition, "partition read failed");
                    break;
                }
            }
        }
    }
}
