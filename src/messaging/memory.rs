use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use murmur2::{KAFKA_SEED, murmur2};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::messaging::{Delivery, MessageConsumer, MessagePublisher, TransportError};

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    partitions: usize,
    topics: Mutex<HashMap<String, TopicLog>>,
    appended: Notify,
}

struct TopicLog {
    partitions: Vec<Vec<StoredMessage>>,
    // (group, partition) -> next offset to read
    committed: HashMap<(String, i32), i64>,
}

struct StoredMessage {
    key: String,
    payload: Vec<u8>,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        TopicLog {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            committed: HashMap::new(),
        }
    }
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        InMemoryBroker {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                topics: Mutex::new(HashMap::new()),
                appended: Notify::new(),
            }),
        }
    }

    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    fn partition_for(&self, key: &str) -> usize {
        (murmur2(key.as_bytes(), KAFKA_SEED) & 0x7fff_ffff) as usize % self.inner.partitions
    }

    /// Joins `group` on one partition of `topic`, resuming after the group's
    /// last committed offset.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: i32,
    ) -> Result<InMemoryConsumer, TransportError> {
        if partition < 0 || partition as usize >= self.inner.partitions {
            return Err(TransportError::SubscriptionFailed {
                topic: topic.to_owned(),
                reason: format!(
                    "partition {} out of range 0..{}",
                    partition, self.inner.partitions
                ),
            });
        }

        let mut topics = self.inner.topics.lock().await;
        let log = topics
            .entry(topic.to_owned())
            .or_insert_with(|| TopicLog::new(self.inner.partitions));
        let position = log
            .committed
            .get(&(group.to_owned(), partition))
            .copied()
            .unwrap_or(0);

        debug!(
            "{} joined {}[{}] at offset {}",
            group, topic, partition, position
        );

        Ok(InMemoryConsumer {
            broker: self.clone(),
            topic: topic.to_owned(),
            group: group.to_owned(),
            partition,
            position,
        })
    }

    /// Messages of `topic` not yet committed by `group`, over all partitions.
    pub async fn lag(&self, topic: &str, group: &str) -> u64 {
        let topics = self.inner.topics.lock().await;
        let Some(log) = topics.get(topic) else {
            return 0;
        };

        log.partitions
            .iter()
            .enumerate()
            .map(|(partition, messages)| {
                let committed = log
                    .committed
                    .get(&(group.to_owned(), partition as i32))
                    .copied()
                    .unwrap_or(0);
                (messages.len() as i64 - committed).max(0) as u64
            })
            .sum()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let partition = self.partition_for(key);
        {
            let mut topics = self.inner.topics.lock().await;
            let log = topics
                .entry(topic.to_owned())
                .or_insert_with(|| TopicLog::new(self.inner.partitions));
            let messages = log
                .partitions
                .get_mut(partition)
                .ok_or_else(|| TransportError::PublishFailed {
                    topic: topic.to_owned(),
                    reason: format!("no partition {}", partition),
                })?;
            messages.push(StoredMessage {
                key: key.to_owned(),
                payload,
            });
            trace!(
                "Appended to {}[{}] at offset {}",
                topic,
                partition,
                messages.len() - 1
            );
        }
        self.inner.appended.notify_waiters();

        Ok(())
    }
}

pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    topic: String,
    group: String,
    partition: i32,
    position: i64,
}

impl InMemoryConsumer {
    async fn try_next(&mut self) -> Option<Delivery> {
        let topics = self.broker.inner.topics.lock().await;
        let message = topics
            .get(&self.topic)?
            .partitions
            .get(self.partition as usize)?
            .get(self.position as usize)?;

        let delivery = Delivery {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.position,
            key: Some(message.key.clone()),
            payload: message.payload.clone(),
        };
        self.position += 1;

        Some(delivery)
    }

    fn require_own(&self, delivery: &Delivery) -> Result<(), TransportError> {
        if delivery.topic != self.topic || delivery.partition != self.partition {
            return Err(TransportError::CommitFailed(format!(
                "{}[{}] is not assigned to this consumer",
                delivery.topic, delivery.partition
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn next(&mut self) -> Result<Delivery, TransportError> {
        let inner = self.broker.inner.clone();
        loop {
            // Registered before the check so an append in between is not missed.
            let appended = inner.appended.notified();
            if let Some(delivery) = self.try_next().await {
                return Ok(delivery);
            }
            appended.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.require_own(delivery)?;

        let mut topics = self.broker.inner.topics.lock().await;
        let log = topics
            .get_mut(&self.topic)
            .ok_or(TransportError::Closed)?;
        let committed = log
            .committed
            .entry((self.group.clone(), self.partition))
            .or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);

        Ok(())
    }

    async fn rewind(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.require_own(delivery)?;
        self.position = delivery.offset;
        Ok(())
    }
}
