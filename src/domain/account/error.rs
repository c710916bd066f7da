use derive_more::Display;

#[derive(Debug, PartialEq, Display)]
pub enum AccountError {
    DuplicateAccount,
    AccountNotFound,
    #[display("InvalidArgument: {_0}")]
    InvalidArgument(&'static str),
}

impl std::error::Error for AccountError {}
