use chrono::{DateTime, Utc};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::domain::{
    money::Money,
    props::{AccountId, TransactionId, TransactionStatus, TransferTypeId},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TransactionEvent {
    TransactionCreated(TransactionCreatedPayload),
    TransactionStatusUpdated(TransactionStatusUpdatedPayload),
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> String {
        let event_type: &str = match self {
            TransactionEvent::TransactionCreated(_) => "TransactionCreated",
            TransactionEvent::TransactionStatusUpdated(_) => "TransactionStatusUpdated",
        };
        event_type.to_string()
    }

    fn event_version(&self) -> String {
        "1.0".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionCreatedPayload {
    pub id: TransactionId,
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub transfer_type_id: TransferTypeId,
    pub value: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionStatusUpdatedPayload {
    pub id: TransactionId,
    pub previous_status: TransactionStatus,
    pub new_status: TransactionStatus,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}
