use common::metrics;
use domain::Order;
use messaging::{ConsumerError, PartitionStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::service::OrderCacheService;

/// Pause after a transport error before polling the partition again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one stream message. Every outcome other than `Stored`
/// means the message was dropped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored,
    DecodeFailed,
    Invalid,
    StoreFailed,
    TimedOut,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Stored => "stored",
            IngestOutcome::DecodeFailed => "decode_error",
            IngestOutcome::Invalid => "invalid",
            IngestOutcome::StoreFailed => "store_error",
            IngestOutcome::TimedOut => "timeout",
        }
    }
}

/// Turns stream messages into orders and feeds them to the cache service.
///
/// Delivery is at most once: nothing is retried or dead-lettered.
pub struct OrderIngestor {
    service: Arc<OrderCacheService>,
    write_timeout: Duration,
}

impl OrderIngestor {
    pub fn new(service: Arc<OrderCacheService>, write_timeout: Duration) -> Self {
        Self {
            service,
            write_timeout,
        }
    }

    /// Decode, validate and store one message payload
    pub async fn handle_payload(&self, partition: i32, payload: &[u8]) -> IngestOutcome {
        let start = Instant::now();
        let outcome = self.ingest(partition, payload).await;
        metrics::record_ingest(outcome.as_str(), start.elapsed().as_secs_f64());
        outcome
    }

    async fn ingest(&self, partition: i32, payload: &[u8]) -> IngestOutcome {
        let order = match Order::from_slice(payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(partition, error = %e, "Failed to decode order, dropping message");
                return IngestOutcome::DecodeFailed;
            }
        };

        if let Err(e) = order.ensure_valid() {
            warn!(partition, error = %e, "Invalid order, dropping message");
            return IngestOutcome::Invalid;
        }

        let order_uid = order.order_uid.clone();
        match tokio::time::timeout(self.write_timeout, self.service.create_order(order)).await {
            Ok(Ok(_)) => {
                info!(partition, order_uid = %order_uid, "Order processed successfully");
                IngestOutcome::Stored
            }
            Ok(Err(e)) => {
                error!(partition, order_uid = %order_uid, error = %e, "Failed to create order, dropping message");
                IngestOutcome::StoreFailed
            }
            Err(_) => {
                error!(
                    partition,
                    order_uid = %order_uid,
                    timeout_secs = self.write_timeout.as_secs_f64(),
                    "Creating order timed out, dropping message"
                );
                IngestOutcome::TimedOut
            }
        }
    }

    /// Consume one partition in arrival order until the stream ends or
    /// `shutdown` turns true. Returns the number of payloads handled.
    pub async fn run_partition<S: PartitionStream>(
        &self,
        mut stream: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        let partition = stream.partition();
        let mut handled = 0;
        info!(partition, "Partition consumer started");

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = stream.next_payload() => match next {
                    Some(Ok(payload)) => {
                        self.handle_payload(partition, &payload).await;
                        handled += 1;
                    }
                    Some(Err(ConsumerError::NoPayload)) => {
                        warn!(partition, "Skipping message without payload");
                    }
                    Some(Err(e)) => {
                        error!(partition, error = %e, "Error consuming partition");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                    None => {
                        info!(partition, "Partition stream ended");
                        break;
                    }
                },
            }
        }

        info!(partition, handled, "Partition consumer stopped");
        handled
    }

    /// Start one independent consumption loop per partition stream
    pub fn spawn_partitions<S>(
        self: &Arc<Self>,
        streams: Vec<S>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<u64>>
    where
        S: PartitionStream + 'static,
    {
        streams
            .into_iter()
            .map(|stream| {
                let ingestor = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { ingestor.run_partition(stream, shutdown).await })
            })
            .collect()
    }
}
