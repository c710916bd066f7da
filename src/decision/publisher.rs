use std::sync::Arc;

use derive_more::{Display, From};
use tracing::debug;
use uuid::Uuid;

use crate::{
    decision::message::ValidationDecision,
    messaging::{MessagePublisher, TransportError},
};

#[derive(Debug, Display, From)]
pub enum PublishError {
    #[display("Could not encode decision: {_0}")]
    Encode(serde_json::Error),
    Transport(TransportError),
}

impl std::error::Error for PublishError {}

/// Emits validation decisions onto the decision topic. Failures are returned
/// to the caller, never swallowed.
#[derive(Clone)]
pub struct DecisionPublisher {
    transport: Arc<dyn MessagePublisher>,
    topic: String,
}

impl DecisionPublisher {
    pub fn new(transport: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        DecisionPublisher {
            transport,
            topic: topic.into(),
        }
    }

    pub async fn publish(&self, decision: &ValidationDecision) -> Result<(), PublishError> {
        let payload = decision.to_bytes()?;
        // No ordering is needed across transactions, so any key spreads the load.
        let key = Uuid::new_v4().to_string();

        self.transport.publish(&self.topic, &key, payload).await?;

        debug!(
            "Published {} decision for {} to {}",
            decision.status, decision.transaction_external_id, self.topic
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        antifraud::rules::Verdict,
        domain::props::TransactionId,
        messaging::{MessageConsumer, memory::InMemoryBroker},
    };

    struct DownTransport;

    #[async_trait]
    impl MessagePublisher for DownTransport {
        async fn publish(
            &self,
            topic: &str,
            _key: &str,
            _payload: Vec<u8>,
        ) -> Result<(), TransportError> {
            Err(TransportError::PublishFailed {
                topic: topic.to_owned(),
                reason: "broker unavailable".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn publishes_json_decision_on_topic() {
        let broker = InMemoryBroker::new(1);
        let publisher = DecisionPublisher::new(Arc::new(broker.clone()), "decisions");
        let decision =
            ValidationDecision::from_verdict(TransactionId::new(), &Verdict::Approved, Utc::now());

        publisher.publish(&decision).await.unwrap();

        let mut consumer = broker.subscribe("decisions", "test", 0).await.unwrap();
        let delivery = consumer.next().await.unwrap();
        assert_eq!(
            ValidationDecision::from_bytes(&delivery.payload).unwrap(),
            decision
        );
        assert!(delivery.key.is_some());
    }

    #[tokio::test]
    async fn surfaces_transport_failures() {
        let publisher = DecisionPublisher::new(Arc::new(DownTransport), "decisions");
        let decision =
            ValidationDecision::from_verdict(TransactionId::new(), &Verdict::Approved, Utc::now());

        let result = publisher.publish(&decision).await;

        assert!(matches!(
            result,
            Err(PublishError::Transport(TransportError::PublishFailed { .. }))
        ));
    }
}
