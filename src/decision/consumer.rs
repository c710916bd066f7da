use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    decision::handler::{HandleOutcome, MessageHandler},
    messaging::{MessageConsumer, TransportError},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub applied: u64,
    pub unchanged: u64,
    pub dropped: u64,
    pub retried: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: HandleOutcome) {
        match outcome {
            HandleOutcome::Applied => self.applied += 1,
            HandleOutcome::Unchanged => self.unchanged += 1,
            HandleOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Long-running loop bound to one subscription. Deliveries are handled one at
/// a time and committed only once the handler is done with them.
pub struct DecisionConsumer<C> {
    consumer: C,
    handler: Arc<dyn MessageHandler>,
    retry_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<C: MessageConsumer> DecisionConsumer<C> {
    /// Sending `true` on the returned sender stops the loop after the
    /// in-flight delivery, if any, has been handled.
    pub fn new(
        consumer: C,
        handler: Arc<dyn MessageHandler>,
        retry_backoff: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown) = watch::channel(false);

        (
            DecisionConsumer {
                consumer,
                handler,
                retry_backoff,
                shutdown,
            },
            shutdown_tx,
        )
    }

    pub async fn run(mut self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.consumer.next() => next,
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    warn!("Receive failed, retrying: {}", e);
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            // Not raced against shutdown: an in-flight delivery always finishes.
            match self.handler.handle(&delivery.payload).await {
                Ok(outcome) => {
                    stats.record(outcome);
                    if let Err(e) = self.consumer.commit(&delivery).await {
                        // Handling is idempotent, redelivery is harmless.
                        warn!(
                            "Commit of {}[{}]@{} (key {:?}) failed: {}",
                            delivery.topic, delivery.partition, delivery.offset, delivery.key, e
                        );
                    }
                }
                Err(e) => {
                    stats.retried += 1;
                    warn!(
                        "{}[{}]@{} (key {:?}) will be redelivered: {}",
                        delivery.topic, delivery.partition, delivery.offset, delivery.key, e
                    );
                    if let Err(e) = self.consumer.rewind(&delivery).await {
                        warn!("Rewind failed: {}", e);
                    }
                    if self.pause().await {
                        break;
                    }
                }
            }
        }

        info!(
            "Decision consumer stopped: {} applied, {} unchanged, {} dropped, {} retried",
            stats.applied, stats.unchanged, stats.dropped, stats.retried
        );

        stats
    }

    /// Sleeps for the retry back-off. Returns `true` when shutdown was
    /// requested meanwhile.
    async fn pause(&mut self) -> bool {
        debug!("Backing off for {:?}", self.retry_backoff);
        tokio::select! {
            _ = tokio::time::sleep(self.retry_backoff) => *self.shutdown.borrow(),
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }
}
