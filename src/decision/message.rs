use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    antifraud::rules::Verdict,
    domain::props::{TransactionId, TransactionStatus},
};

/// Terminal outcome carried on the decision topic. `pending` is never a
/// decision, so it does not deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[display("approved")]
    Approved,
    #[display("rejected")]
    Rejected,
}

impl From<DecisionStatus> for TransactionStatus {
    fn from(status: DecisionStatus) -> Self {
        match status {
            DecisionStatus::Approved => TransactionStatus::Approved,
            DecisionStatus::Rejected => TransactionStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDecision {
    pub transaction_external_id: TransactionId,
    pub status: DecisionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ValidationDecision {
    pub fn from_verdict(id: TransactionId, verdict: &Verdict, processed_at: DateTime<Utc>) -> Self {
        let status = match verdict {
            Verdict::Approved => DecisionStatus::Approved,
            Verdict::Rejected { .. } => DecisionStatus::Rejected,
        };

        ValidationDecision {
            transaction_external_id: id,
            status,
            reason: verdict.reason().map(str::to_owned),
            processed_at,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
