use std::fmt;

use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Display)]
pub enum PropsError {
    #[display("{_0} cannot be empty")]
    EmptyIdentifier(&'static str),
    #[display("Transfer type ID must be greater than zero, got {_0}")]
    InvalidTransferType(i64),
}

impl std::error::Error for PropsError {}

#[derive(
    Shrinkwrap, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, Hash, Into,
)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl TryFrom<Uuid> for TransactionId {
    type Error = PropsError;

    fn try_from(value: Uuid) -> Result<Self, Self::Error> {
        if value.is_nil() {
            return Err(PropsError::EmptyIdentifier("Transaction ID"));
        }
        Ok(TransactionId(value))
    }
}

#[derive(
    Shrinkwrap, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, Hash, Into,
)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct AccountId(Uuid);

impl TryFrom<Uuid> for AccountId {
    type Error = PropsError;

    fn try_from(value: Uuid) -> Result<Self, Self::Error> {
        if value.is_nil() {
            return Err(PropsError::EmptyIdentifier("Account ID"));
        }
        Ok(AccountId(value))
    }
}

#[derive(
    Shrinkwrap, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, Hash, Into,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct TransferTypeId(i64);

impl TryFrom<i64> for TransferTypeId {
    type Error = PropsError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(PropsError::InvalidTransferType(value));
        }
        Ok(TransferTypeId(value))
    }
}

/// Lifecycle state of a transaction. `Approved` and `Rejected` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            TransactionStatus::Pending => false,
            TransactionStatus::Approved | TransactionStatus::Rejected => true,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn nil_identifiers_are_rejected() {
        assert_eq!(
            TransactionId::try_from(Uuid::nil()),
            Err(PropsError::EmptyIdentifier("Transaction ID"))
        );
        assert_eq!(
            AccountId::try_from(Uuid::nil()),
            Err(PropsError::EmptyIdentifier("Account ID"))
        );
    }

    #[test]
    fn identifiers_keep_their_value() {
        let raw = Uuid::new_v4();
        let id = TransactionId::try_from(raw).unwrap();
        assert_eq!(*id, raw);
        assert_eq!(id.to_string(), raw.to_string());
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn nil_identifier_does_not_deserialize() {
        let json = format!("\"{}\"", Uuid::nil());
        assert!(serde_json::from_str::<AccountId>(&json).is_err());
    }

    #[test]
    fn transfer_type_must_be_positive() {
        assert!(TransferTypeId::try_from(1).is_ok());
        assert_eq!(
            TransferTypeId::try_from(0),
            Err(PropsError::InvalidTransferType(0))
        );
        assert!(TransferTypeId::try_from(-3).is_err());
    }

    #[test]
    fn only_pending_is_not_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Approved.is_terminal());
        assert!(TransactionStatus::Rejected.is_terminal());
        assert_eq!(TransactionStatus::Rejected.to_string(), "rejected");
    }
}
