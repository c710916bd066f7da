use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{
    money::Money,
    props::{AccountId, TransactionId, TransactionStatus, TransferTypeId},
};

#[derive(Debug, Clone, Deserialize)]
pub enum TransactionCommand {
    CreateTransaction(CreateTransactionPayload),
    ApproveTransaction(ApproveTransactionPayload),
    RejectTransaction(RejectTransactionPayload),
    ApplyDecision(ApplyDecisionPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionPayload {
    pub id: TransactionId,
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub transfer_type_id: TransferTypeId,
    pub value: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveTransactionPayload {
    pub id: TransactionId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectTransactionPayload {
    pub id: TransactionId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// Decisions may be replayed, so applying one is allowed to be a no-op.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyDecisionPayload {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}
