use async_trait::async_trait;
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    account::{
        command::{
            AccountCommand, DeactivateAccountPayload, OpenAccountPayload,
            ReactivateAccountPayload,
        },
        error::AccountError,
        event::{
            AccountDeactivatedPayload, AccountEvent, AccountOpenedPayload,
            AccountReactivatedPayload,
        },
    },
    props::AccountId,
};

// Aggregate
#[derive(Serialize, Default, Deserialize, Debug)]
pub struct Account {
    id: Option<AccountId>,
    account_number: String,
    holder_name: String,
    active: bool,
}

// Interface to the outside world, not used in this case.
pub struct AccountServices {}

#[async_trait]
impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = AccountError;
    type Services = AccountServices;

    fn aggregate_type() -> String {
        "Account".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        _services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(p) => self.open(p),
            AccountCommand::DeactivateAccount(p) => self.deactivate(p),
            AccountCommand::ReactivateAccount(p) => self.reactivate(p),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            AccountEvent::AccountOpened(p) => {
                self.id = Some(p.account_id);
                self.account_number = p.account_number;
                self.holder_name = p.holder_name;
                self.active = true;
            }
            AccountEvent::AccountDeactivated(_) => {
                self.active = false;
            }
            AccountEvent::AccountReactivated(_) => {
                self.active = true;
            }
        }
    }
}

impl Account {
    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.exists() && self.active
    }

    fn open(
        &self,
        p: OpenAccountPayload,
    ) -> Result<Vec<<Account as Aggregate>::Event>, <Account as Aggregate>::Error> {
        debug!("Opening {} for {}", p.account_id, p.holder_name);

        if self.exists() {
            return Err(AccountError::DuplicateAccount);
        }

        if p.account_number.trim().is_empty() {
            return Err(AccountError::InvalidArgument(
                "Account number cannot be empty",
            ));
        }

        if p.holder_name.trim().is_empty() {
            return Err(AccountError::InvalidArgument("Holder name cannot be empty"));
        }

        Ok(vec![AccountEvent::AccountOpened(AccountOpenedPayload {
            account_id: p.account_id,
            account_number: p.account_number.trim().to_owned(),
            holder_name: p.holder_name.trim().to_owned(),
        })])
    }

    fn deactivate(
        &self,
        p: DeactivateAccountPayload,
    ) -> Result<Vec<<Account as Aggregate>::Event>, <Account as Aggregate>::Error> {
        debug!("Deactivating {}", p.account_id);

        require_existing(self)?;

        if !self.active {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountDeactivated(
            AccountDeactivatedPayload {
                account_id: p.account_id,
            },
        )])
    }

    fn reactivate(
        &self,
        p: ReactivateAccountPayload,
    ) -> Result<Vec<<Account as Aggregate>::Event>, <Account as Aggregate>::Error> {
        debug!("Reactivating {}", p.account_id);

        require_existing(self)?;

        if self.active {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountReactivated(
            AccountReactivatedPayload {
                account_id: p.account_id,
            },
        )])
    }
}

fn require_existing(account: &Account) -> Result<(), <Account as Aggregate>::Error> {
    if !account.exists() {
        return Err(AccountError::AccountNotFound);
    }

    Ok(())
}

pub fn acc_aggregate_id(id: &AccountId) -> String {
    format!("Account-{}", id)
}

#[cfg(test)]
mod tests {
    use cqrs_es::{Aggregate, test::TestFramework};
    use uuid::Uuid;

    use crate::domain::{
        account::{
            aggregate::{Account, AccountServices},
            command::{
                AccountCommand, DeactivateAccountPayload, OpenAccountPayload,
                ReactivateAccountPayload,
            },
            error::AccountError,
            event::{
                AccountDeactivatedPayload, AccountEvent, AccountOpenedPayload,
                AccountReactivatedPayload,
            },
        },
        props::AccountId,
    };

    type AccountTestFramework = TestFramework<Account>;

    fn account_id() -> AccountId {
        AccountId::try_from(Uuid::from_u128(42)).unwrap()
    }

    fn opened() -> AccountEvent {
        AccountEvent::AccountOpened(AccountOpenedPayload {
            account_id: account_id(),
            account_number: "ACC-0042".to_owned(),
            holder_name: "Ada Lovelace".to_owned(),
        })
    }

    fn deactivated() -> AccountEvent {
        AccountEvent::AccountDeactivated(AccountDeactivatedPayload {
            account_id: account_id(),
        })
    }

    #[test]
    fn test_open_account() {
        AccountTestFramework::with(AccountServices {})
            .given_no_previous_events()
            .when(AccountCommand::OpenAccount(OpenAccountPayload {
                account_id: account_id(),
                account_number: " ACC-0042 ".to_owned(),
                holder_name: "Ada Lovelace".to_owned(),
            }))
            .then_expect_events(vec![opened()]);
    }

    #[test]
    fn test_open_account_twice() {
        AccountTestFramework::with(AccountServices {})
            .given(vec![opened()])
            .when(AccountCommand::OpenAccount(OpenAccountPayload {
                account_id: account_id(),
                account_number: "ACC-0042".to_owned(),
                holder_name: "Ada Lovelace".to_owned(),
            }))
            .then_expect_error(AccountError::DuplicateAccount);
    }

    #[test]
    fn test_open_account_without_holder() {
        AccountTestFramework::with(AccountServices {})
            .given_no_previous_events()
            .when(AccountCommand::OpenAccount(OpenAccountPayload {
                account_id: account_id(),
                account_number: "ACC-0042".to_owned(),
                holder_name: "".to_owned(),
            }))
            .then_expect_error(AccountError::InvalidArgument("Holder name cannot be empty"));
    }

    #[test]
    fn test_deactivate_account() {
        AccountTestFramework::with(AccountServices {})
            .given(vec![opened()])
            .when(AccountCommand::DeactivateAccount(DeactivateAccountPayload {
                account_id: account_id(),
            }))
            .then_expect_events(vec![deactivated()]);
    }

    #[test]
    fn test_deactivate_twice_is_noop() {
        AccountTestFramework::with(AccountServices {})
            .given(vec![opened(), deactivated()])
            .when(AccountCommand::DeactivateAccount(DeactivateAccountPayload {
                account_id: account_id(),
            }))
            .then_expect_events(vec![]);
    }

    #[test]
    fn test_deactivate_unknown_account() {
        AccountTestFramework::with(AccountServices {})
            .given_no_previous_events()
            .when(AccountCommand::DeactivateAccount(DeactivateAccountPayload {
                account_id: account_id(),
            }))
            .then_expect_error(AccountError::AccountNotFound);
    }

    #[test]
    fn test_reactivate_account() {
        AccountTestFramework::with(AccountServices {})
            .given(vec![opened(), deactivated()])
            .when(AccountCommand::ReactivateAccount(ReactivateAccountPayload {
                account_id: account_id(),
            }))
            .then_expect_events(vec![AccountEvent::AccountReactivated(
                AccountReactivatedPayload {
                    account_id: account_id(),
                },
            )]);
    }

    #[test]
    fn test_activity_follows_events() {
        let mut account = Account::default();
        assert!(!account.exists());
        assert!(!account.is_active());

        account.apply(opened());
        assert!(account.is_active());

        account.apply(deactivated());
        assert!(account.exists());
        assert!(!account.is_active());
    }
}
