use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use derive_more::Display;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    decision::message::ValidationDecision,
    domain::{
        props::TransactionStatus,
        transaction::command::{ApplyDecisionPayload, TransactionCommand},
    },
    store::{TransactionRepository, is_transient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HandleOutcome {
    /// The decision moved the transaction out of `pending`.
    Applied,
    /// The transaction had already been decided.
    Unchanged,
    /// Unusable message, logged and discarded.
    Dropped,
}

/// A failure that may go away on redelivery. The message must not be committed.
#[derive(Debug, Clone, PartialEq, Display)]
#[display("Transient failure: {_0}")]
pub struct TransientError(pub String);

impl std::error::Error for TransientError {}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<HandleOutcome, TransientError>;
}

/// Applies validation decisions to the matching transaction.
pub struct DecisionHandler {
    transactions: Arc<dyn TransactionRepository>,
}

impl DecisionHandler {
    pub fn new(transactions: Arc<dyn TransactionRepository>) -> Self {
        DecisionHandler { transactions }
    }

    pub async fn on_decision_received(
        &self,
        payload: &[u8],
    ) -> Result<HandleOutcome, TransientError> {
        let decision = match ValidationDecision::from_bytes(payload) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Dropping malformed decision: {}", e);
                return Ok(HandleOutcome::Dropped);
            }
        };

        let span = info_span!("decision", transaction = %decision.transaction_external_id);
        self.apply(decision).instrument(span).await
    }

    async fn apply(&self, decision: ValidationDecision) -> Result<HandleOutcome, TransientError> {
        let id = decision.transaction_external_id;

        let record = match self.transactions.find_by_id(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Dropping {} decision for unknown transaction", decision.status);
                return Ok(HandleOutcome::Dropped);
            }
            Err(e) if is_transient(&e) => return Err(TransientError(e.to_string())),
            Err(e) => {
                warn!("Dropping decision, transaction unreadable: {}", e);
                return Ok(HandleOutcome::Dropped);
            }
        };

        let command = TransactionCommand::ApplyDecision(ApplyDecisionPayload {
            id,
            status: decision.status.into(),
            reason: decision.reason,
            at: Utc::now(),
        });

        match self.transactions.execute(&id, command).await {
            Ok(()) if record.status == TransactionStatus::Pending => {
                info!("Transaction {}", decision.status);
                Ok(HandleOutcome::Applied)
            }
            Ok(()) => {
                debug!(
                    "Transaction already {}, {} decision absorbed",
                    record.status, decision.status
                );
                Ok(HandleOutcome::Unchanged)
            }
            Err(e) if is_transient(&e) => Err(TransientError(e.to_string())),
            Err(e) => {
                warn!("Dropping decision, could not be applied: {}", e);
                Ok(HandleOutcome::Dropped)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DecisionHandler {
    async fn handle(&self, payload: &[u8]) -> Result<HandleOutcome, TransientError> {
        self.on_decision_received(payload).await
    }
}
