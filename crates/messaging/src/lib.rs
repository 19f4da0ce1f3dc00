pub mod consumer;

pub use consumer::{
    ChannelPartitionStream, ConsumerError, KafkaPartitionStream, PartitionStream,
    PartitionedConsumer,
};
