use derive_more::Display;

use crate::domain::props::TransactionStatus;

#[derive(Debug, PartialEq, Display)]
pub enum TransactionError {
    DuplicateTransaction,
    TransactionNotFound,
    #[display("InvalidTransaction: {_0}")]
    InvalidTransaction(&'static str),
    #[display("InvalidState: only pending transactions can become {requested}, current status is {current}")]
    InvalidState {
        current: TransactionStatus,
        requested: TransactionStatus,
    },
    #[display("InvalidArgument: {_0}")]
    InvalidArgument(&'static str),
}

impl std::error::Error for TransactionError {}
