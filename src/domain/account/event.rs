use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::domain::props::AccountId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AccountEvent {
    AccountOpened(AccountOpenedPayload),
    AccountDeactivated(AccountDeactivatedPayload),
    AccountReactivated(AccountReactivatedPayload),
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> String {
        let event_type: &str = match self {
            AccountEvent::AccountOpened(_) => "AccountOpened",
            AccountEvent::AccountDeactivated(_) => "AccountDeactivated",
            AccountEvent::AccountReactivated(_) => "AccountReactivated",
        };
        event_type.to_string()
    }

    fn event_version(&self) -> String {
        "1.0".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountOpenedPayload {
    pub account_id: AccountId,
    pub account_number: String,
    pub holder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountDeactivatedPayload {
    pub account_id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountReactivatedPayload {
    pub account_id: AccountId,
}
