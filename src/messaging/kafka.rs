use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    ClientConfig, Offset, TopicPartitionList,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::Message,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use tracing::{debug, info};

use crate::messaging::{Delivery, MessageConsumer, MessagePublisher, TransportError};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, client_id: &str) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| TransportError::PublishFailed {
                topic: String::new(),
                reason: format!("Failed to create producer: {e}"),
            })?;

        info!(brokers = %brokers, client_id = %client_id, "Kafka producer created");

        Ok(KafkaPublisher { producer })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(delivered) => {
                debug!(topic = %topic, delivered = ?delivered, "Message published");
                Ok(())
            }
            Err((e, _)) => Err(TransportError::PublishFailed {
                topic: topic.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn subscribe(
        brokers: &str,
        client_id: &str,
        group: &str,
        topic: &str,
    ) -> Result<Self, TransportError> {
        let subscription_failed = |reason: String| TransportError::SubscriptionFailed {
            topic: topic.to_owned(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| subscription_failed(e.to_string()))?;

        info!(topic = %topic, group = %group, "Subscribed to topic");

        Ok(KafkaConsumer { consumer })
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn next(&mut self) -> Result<Delivery, TransportError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        Ok(Delivery {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| TransportError::CommitFailed(e.to_string()))?;

        // Queued without waiting for the broker, a lost commit only means redelivery.
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| TransportError::CommitFailed(e.to_string()))
    }

    async fn rewind(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Timeout::After(SEEK_TIMEOUT),
            )
            .map_err(|e| TransportError::ReceiveFailed(format!("Seek failed: {e}")))
    }
}
