use serde::Deserialize;

use crate::domain::props::AccountId;

#[derive(Debug, Clone, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccountPayload),
    DeactivateAccount(DeactivateAccountPayload),
    ReactivateAccount(ReactivateAccountPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAccountPayload {
    pub account_id: AccountId,
    pub account_number: String,
    pub holder_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeactivateAccountPayload {
    pub account_id: AccountId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactivateAccountPayload {
    pub account_id: AccountId,
}
