use std::sync::Arc;

use chrono::Utc;
use derive_more::Display;
use tokio::{
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    antifraud::rules::{DailyAccumulation, FraudRules, Verdict},
    decision::{
        message::ValidationDecision,
        publisher::{DecisionPublisher, PublishError},
    },
    domain::props::TransactionId,
    store::TransactionRepository,
};

pub const TRANSACTION_NOT_FOUND: &str = "Transaction not found";

pub struct FraudScreening {
    transactions: Arc<dyn TransactionRepository>,
    accumulation: Arc<dyn DailyAccumulation>,
    rules: FraudRules,
    publisher: DecisionPublisher,
}

impl FraudScreening {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        accumulation: Arc<dyn DailyAccumulation>,
        rules: FraudRules,
        publisher: DecisionPublisher,
    ) -> Self {
        FraudScreening {
            transactions,
            accumulation,
            rules,
            publisher,
        }
    }

    /// Evaluates one transaction and publishes the verdict. Returns `None`
    /// when the transaction was already decided and nothing was published.
    pub async fn screen(&self, id: TransactionId) -> Result<Option<Verdict>, PublishError> {
        let span = info_span!("screening", transaction = %id);
        self.screen_inner(id).instrument(span).await
    }

    async fn screen_inner(&self, id: TransactionId) -> Result<Option<Verdict>, PublishError> {
        let verdict = match self.transactions.find_by_id(&id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                debug!("Already {}, skipping evaluation", record.status);
                return Ok(None);
            }
            Ok(Some(record)) => self.rules.assess(&record, self.accumulation.as_ref()).await,
            Ok(None) => {
                warn!("Transaction to evaluate does not exist");
                Verdict::rejected(TRANSACTION_NOT_FOUND)
            }
            Err(e) => {
                warn!("Could not load transaction, rejecting: {}", e);
                Verdict::rejected(format!("Validation error: {}", e))
            }
        };

        if verdict.should_reject() {
            info!("Verdict {}: {}", verdict.status(), verdict.reason().unwrap_or_default());
        } else {
            debug!("Verdict {}", verdict.status());
        }

        let decision = ValidationDecision::from_verdict(id, &verdict, Utc::now());
        self.publisher
            .publish(&decision)
            .await
            .inspect_err(|e| error!("Decision was not published: {}", e))?;

        Ok(Some(verdict))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Display)]
#[display("Evaluation queue is closed")]
pub struct QueueClosed;

impl std::error::Error for QueueClosed {}

/// Cheap handle for enqueueing transactions to evaluate.
#[derive(Clone)]
pub struct EvaluationSubmitter {
    tx: mpsc::UnboundedSender<TransactionId>,
}

impl EvaluationSubmitter {
    pub fn submit(&self, id: TransactionId) -> Result<(), QueueClosed> {
        self.tx.send(id).map_err(|_| QueueClosed)
    }
}

/// Fire-and-forget work queue. Every submitted id is screened on its own task,
/// so a failure in one evaluation never touches another.
pub struct EvaluationQueue {
    submitter: EvaluationSubmitter,
    stop: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

impl EvaluationQueue {
    pub fn spawn(screening: Arc<FraudScreening>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(rx, stop_rx, screening));

        EvaluationQueue {
            submitter: EvaluationSubmitter { tx },
            stop,
            dispatcher,
        }
    }

    pub fn submitter(&self) -> EvaluationSubmitter {
        self.submitter.clone()
    }

    /// Stops accepting work and waits for everything already queued to be
    /// screened.
    pub async fn drain(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.dispatcher.await {
            error!("Evaluation dispatcher failed: {}", e);
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<TransactionId>,
    mut stop: watch::Receiver<bool>,
    screening: Arc<FraudScreening>,
) {
    let mut tasks = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(id) => {
                    let screening = screening.clone();
                    tasks.spawn(async move { screening.screen(id).await });
                }
                None => break,
            },
            Some(joined) = tasks.join_next() => log_joined(joined),
            _ = stop.changed(), if !closing => {
                closing = true;
                // Queued ids are still received, new submissions fail.
                rx.close();
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_joined(joined);
    }
}

fn log_joined(
    joined: Result<Result<Option<Verdict>, PublishError>, tokio::task::JoinError>,
) {
    if let Err(e) = joined {
        error!("Evaluation task failed: {}", e);
    }
}
