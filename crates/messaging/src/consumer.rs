use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{Consumer, DefaultConsumerContext, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Topic {0} does not exist or has no partitions")]
    UnknownTopic(String),

    #[error("Message has no payload")]
    NoPayload,
}

/// A single partition of a topic, consumed independently of the others
#[async_trait]
pub trait PartitionStream: Send {
    fn partition(&self) -> i32;

    /// Wait for the next message payload. `None` once the stream has ended.
    async fn next_payload(&mut self) -> Option<Result<Vec<u8>, ConsumerError>>;
}

/// Kafka consumer that owns every partition of one topic and hands out one
/// [`KafkaPartitionStream`] per partition.
///
/// Partitions are assigned directly (no group rebalancing) starting at the
/// newest offset, and offsets are never committed.
pub struct PartitionedConsumer {
    consumer: Arc<StreamConsumer>,
    streams: Vec<KafkaPartitionStream>,
}

impl PartitionedConsumer {
    /// Connect, discover the topic's partitions and assign all of them
    pub fn new(
        brokers: &str,
        group_id: &str,
        topic: &str,
        metadata_timeout: Duration,
    ) -> Result<Self, ConsumerError> {
        info!(brokers, group_id, topic, "Creating partitioned Kafka consumer");

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .create()?;

        let metadata = consumer.fetch_metadata(Some(topic), metadata_timeout)?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default();

        if partitions.is_empty() {
            return Err(ConsumerError::UnknownTopic(topic.to_string()));
        }

        let consumer = Arc::new(consumer);

        // Queues are split before assignment so that no message of an
        // assigned partition lands on the main queue.
        let streams = partitions
            .iter()
            .filter_map(|&partition| {
                let queue = consumer.split_partition_queue(topic, partition);
                if queue.is_none() {
                    warn!(topic, partition, "Could not split partition queue");
                }
                queue.map(|queue| KafkaPartitionStream { partition, queue })
            })
            .collect();

        let mut assignment = TopicPartitionList::new();
        for &partition in &partitions {
            assignment.add_partition_offset(topic, partition, Offset::End)?;
        }
        consumer.assign(&assignment)?;

        info!(topic, ?partitions, "Assigned all partitions at newest offset");

        Ok(Self {
            consumer,
            streams,
        })
    }

    /// Hand out the per-partition streams. Subsequent calls return nothing.
    pub fn take_partition_streams(&mut self) -> Vec<KafkaPartitionStream> {
        std::mem::take(&mut self.streams)
    }

    /// Drive the main queue so client callbacks are served. Never returns;
    /// run it alongside the partition streams.
    pub async fn serve_main_queue(&self) {
        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        "Unexpected message on main consumer queue"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Kafka error on main consumer queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// One split-off partition queue of a [`PartitionedConsumer`]
pub struct KafkaPartitionStream {
    partition: i32,
    queue: StreamPartitionQueue<DefaultConsumerContext>,
}

#[async_trait]
impl PartitionStream for KafkaPartitionStream {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_payload(&mut self) -> Option<Result<Vec<u8>, ConsumerError>> {
        let result = match self.queue.recv().await {
            Ok(message) => {
                debug!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Received message"
                );
                message
                    .payload()
                    .map(<[u8]>::to_vec)
                    .ok_or(ConsumerError::NoPayload)
            }
            Err(e) => Err(ConsumerError::Kafka(e)),
        };
        Some(result)
    }
}

/// In-process partition fed through a channel; ends when every sender is dropped
pub struct ChannelPartitionStream {
    partition: i32,
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl ChannelPartitionStream {
    pub fn new(partition: i32, buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { partition, receiver })
    }
}

#[async_trait]
impl PartitionStream for ChannelPartitionStream {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_payload(&mut self) -> Option<Result<Vec<u8>, ConsumerError>> {
        self.receiver.recv().await.map(Ok)
    }
}
