use async_trait::async_trait;
use derive_more::Display;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[derive(Debug, Clone, PartialEq, Display)]
pub enum TransportError {
    #[display("Publish to topic '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[display("Subscription to topic '{topic}' failed: {reason}")]
    SubscriptionFailed { topic: String, reason: String },
    #[display("Receive failed: {_0}")]
    ReceiveFailed(String),
    #[display("Commit failed: {_0}")]
    CommitFailed(String),
    #[display("Transport closed")]
    Closed,
}

impl std::error::Error for TransportError {}

/// A message read from a topic, not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// At-least-once reader: whatever was read but not committed is handed out
/// again to the next consumer of the same group.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Waits for the next delivery. Must be cancel safe: dropping the future
    /// before it resolves loses nothing.
    async fn next(&mut self) -> Result<Delivery, TransportError>;

    /// Marks `delivery` and everything before it on its partition as handled.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Moves the read position back so `delivery` is handed out again.
    async fn rewind(&mut self, delivery: &Delivery) -> Result<(), TransportError>;
}
