use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    money::Money,
    props::{AccountId, TransactionId, TransactionStatus, TransferTypeId},
    transaction::{
        command::{
            ApplyDecisionPayload, ApproveTransactionPayload, CreateTransactionPayload,
            RejectTransactionPayload, TransactionCommand,
        },
        error::TransactionError,
        event::{TransactionCreatedPayload, TransactionEvent, TransactionStatusUpdatedPayload},
    },
};

pub const DEFAULT_REJECTION_REASON: &str = "Rejected by anti-fraud system";

// Aggregate. Stays `None` until the creation event has been applied.
#[derive(Serialize, Default, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    record: Option<TransactionRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub transfer_type_id: TransferTypeId,
    pub value: Money,
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// The record a successful creation command leaves behind.
    pub fn pending(p: &CreateTransactionPayload) -> Self {
        TransactionRecord {
            id: p.id,
            source_account_id: p.source_account_id,
            target_account_id: p.target_account_id,
            transfer_type_id: p.transfer_type_id,
            value: p.value.clone(),
            status: TransactionStatus::Pending,
            reason: None,
            created_at: p.created_at,
            updated_at: None,
        }
    }

    /// UTC calendar day the transaction was created on.
    pub fn created_on(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

// Interface to the outside world, not used in this case.
pub struct TransactionServices {}

#[async_trait]
impl Aggregate for Transaction {
    type Command = TransactionCommand;
    type Event = TransactionEvent;
    type Error = TransactionError;
    type Services = TransactionServices;

    fn aggregate_type() -> String {
        "Transaction".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        _services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransactionCommand::CreateTransaction(p) => self.create(p),
            TransactionCommand::ApproveTransaction(p) => self.approve(p),
            TransactionCommand::RejectTransaction(p) => self.reject(p),
            TransactionCommand::ApplyDecision(p) => self.apply_decision(p),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            TransactionEvent::TransactionCreated(p) => {
                self.record = Some(TransactionRecord {
                    id: p.id,
                    source_account_id: p.source_account_id,
                    target_account_id: p.target_account_id,
                    transfer_type_id: p.transfer_type_id,
                    value: p.value,
                    status: TransactionStatus::Pending,
                    reason: None,
                    created_at: p.created_at,
                    updated_at: None,
                });
            }
            TransactionEvent::TransactionStatusUpdated(p) => {
                if let Some(record) = self.record.as_mut() {
                    record.status = p.new_status;
                    record.reason = p.reason;
                    record.updated_at = Some(p.updated_at);
                }
            }
        }
    }
}

impl Transaction {
    pub fn record(&self) -> Option<&TransactionRecord> {
        self.record.as_ref()
    }

    pub fn create(
        &self,
        p: CreateTransactionPayload,
    ) -> Result<Vec<<Transaction as Aggregate>::Event>, <Transaction as Aggregate>::Error> {
        debug!("Creating {} with {}", p.id, p.value);

        require_new(self)?;

        if p.source_account_id == p.target_account_id {
            return Err(TransactionError::InvalidTransaction(
                "Source and target accounts cannot be the same",
            ));
        }

        if !p.value.is_positive() {
            return Err(TransactionError::InvalidTransaction(
                "Transaction value must be greater than zero",
            ));
        }

        Ok(vec![TransactionEvent::TransactionCreated(
            TransactionCreatedPayload {
                id: p.id,
                source_account_id: p.source_account_id,
                target_account_id: p.target_account_id,
                transfer_type_id: p.transfer_type_id,
                value: p.value,
                created_at: p.created_at,
            },
        )])
    }

    pub fn approve(
        &self,
        p: ApproveTransactionPayload,
    ) -> Result<Vec<<Transaction as Aggregate>::Event>, <Transaction as Aggregate>::Error> {
        debug!("Approving {}", p.id);

        let record = require_pending(self, TransactionStatus::Approved)?;

        Ok(vec![status_updated(
            record,
            TransactionStatus::Approved,
            None,
            p.at,
        )])
    }

    pub fn reject(
        &self,
        p: RejectTransactionPayload,
    ) -> Result<Vec<<Transaction as Aggregate>::Event>, <Transaction as Aggregate>::Error> {
        debug!("Rejecting {}: {}", p.id, p.reason);

        let record = require_pending(self, TransactionStatus::Rejected)?;

        if p.reason.trim().is_empty() {
            return Err(TransactionError::InvalidArgument(
                "Rejection reason is required",
            ));
        }

        Ok(vec![status_updated(
            record,
            TransactionStatus::Rejected,
            Some(p.reason),
            p.at,
        )])
    }

    /// Applies a validation decision. Replayed or late decisions are absorbed
    /// without error and without emitting an event.
    pub fn apply_decision(
        &self,
        p: ApplyDecisionPayload,
    ) -> Result<Vec<<Transaction as Aggregate>::Event>, <Transaction as Aggregate>::Error> {
        let record = require_record(self)?;

        if record.status == p.status {
            debug!("{} is already {}, ignoring decision", p.id, p.status);
            return Ok(vec![]);
        }

        if record.status.is_terminal() {
            info!(
                "{} already reached {}, ignoring late {} decision",
                p.id, record.status, p.status
            );
            return Ok(vec![]);
        }

        match p.status {
            TransactionStatus::Pending => Ok(vec![]),
            TransactionStatus::Approved => self.approve(ApproveTransactionPayload {
                id: p.id,
                at: p.at,
            }),
            TransactionStatus::Rejected => {
                let reason = p
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_owned());
                self.reject(RejectTransactionPayload {
                    id: p.id,
                    reason,
                    at: p.at,
                })
            }
        }
    }
}

fn status_updated(
    record: &TransactionRecord,
    new_status: TransactionStatus,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> TransactionEvent {
    TransactionEvent::TransactionStatusUpdated(TransactionStatusUpdatedPayload {
        id: record.id,
        previous_status: record.status,
        new_status,
        reason,
        updated_at: at,
    })
}

fn require_new(transaction: &Transaction) -> Result<(), <Transaction as Aggregate>::Error> {
    if transaction.record.is_some() {
        return Err(TransactionError::DuplicateTransaction);
    }

    Ok(())
}

fn require_record(
    transaction: &Transaction,
) -> Result<&TransactionRecord, <Transaction as Aggregate>::Error> {
    transaction
        .record
        .as_ref()
        .ok_or(TransactionError::TransactionNotFound)
}

fn require_pending(
    transaction: &Transaction,
    requested: TransactionStatus,
) -> Result<&TransactionRecord, <Transaction as Aggregate>::Error> {
    let record = require_record(transaction)?;

    if record.status != TransactionStatus::Pending {
        return Err(TransactionError::InvalidState {
            current: record.status,
            requested,
        });
    }

    Ok(record)
}

pub fn tx_aggregate_id(id: &TransactionId) -> String {
    format!("Transaction-{}", id)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use cqrs_es::{Aggregate, test::TestFramework};
    use rust_decimal::{Decimal, dec};
    use uuid::Uuid;

    use crate::domain::{
        money::{Currency, Money},
        props::{AccountId, TransactionId, TransactionStatus, TransferTypeId},
        transaction::{
            aggregate::{DEFAULT_REJECTION_REASON, Transaction, TransactionServices},
            command::{
                ApplyDecisionPayload, ApproveTransactionPayload, CreateTransactionPayload,
                RejectTransactionPayload, TransactionCommand,
            },
            error::TransactionError,
            event::{
                TransactionCreatedPayload, TransactionEvent, TransactionStatusUpdatedPayload,
            },
        },
    };

    type TransactionTestFramework = TestFramework<Transaction>;

    fn tx_id() -> TransactionId {
        TransactionId::try_from(Uuid::from_u128(0x7a)).unwrap()
    }

    fn account(n: u128) -> AccountId {
        AccountId::try_from(Uuid::from_u128(n)).unwrap()
    }

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::usd()).unwrap()
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn decided_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap()
    }

    fn created_event() -> TransactionEvent {
        TransactionEvent::TransactionCreated(TransactionCreatedPayload {
            id: tx_id(),
            source_account_id: account(1),
            target_account_id: account(2),
            transfer_type_id: TransferTypeId::try_from(1).unwrap(),
            value: usd(dec!(120.50)),
            created_at: created_at(),
        })
    }

    fn updated_event(new_status: TransactionStatus, reason: Option<&str>) -> TransactionEvent {
        TransactionEvent::TransactionStatusUpdated(TransactionStatusUpdatedPayload {
            id: tx_id(),
            previous_status: TransactionStatus::Pending,
            new_status,
            reason: reason.map(str::to_owned),
            updated_at: decided_at(),
        })
    }

    fn create_command(source: AccountId, target: AccountId, value: Money) -> TransactionCommand {
        TransactionCommand::CreateTransaction(CreateTransactionPayload {
            id: tx_id(),
            source_account_id: source,
            target_account_id: target,
            transfer_type_id: TransferTypeId::try_from(1).unwrap(),
            value,
            created_at: created_at(),
        })
    }

    fn decision(status: TransactionStatus, reason: Option<&str>) -> TransactionCommand {
        TransactionCommand::ApplyDecision(ApplyDecisionPayload {
            id: tx_id(),
            status,
            reason: reason.map(str::to_owned),
            at: decided_at(),
        })
    }

    fn given(events: Vec<TransactionEvent>) -> Transaction {
        let mut transaction = Transaction::default();
        for event in events {
            transaction.apply(event);
        }
        transaction
    }

    #[test]
    fn test_create_transaction() {
        TransactionTestFramework::with(TransactionServices {})
            .given_no_previous_events()
            .when(create_command(account(1), account(2), usd(dec!(120.50))))
            .then_expect_events(vec![created_event()]);
    }

    #[test]
    fn test_create_duplicate_transaction() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(create_command(account(1), account(2), usd(dec!(120.50))))
            .then_expect_error(TransactionError::DuplicateTransaction);
    }

    #[test]
    fn test_create_to_same_account() {
        TransactionTestFramework::with(TransactionServices {})
            .given_no_previous_events()
            .when(create_command(account(1), account(1), usd(dec!(10))))
            .then_expect_error(TransactionError::InvalidTransaction(
                "Source and target accounts cannot be the same",
            ));
    }

    #[test]
    fn test_create_zero_value() {
        TransactionTestFramework::with(TransactionServices {})
            .given_no_previous_events()
            .when(create_command(account(1), account(2), usd(dec!(0))))
            .then_expect_error(TransactionError::InvalidTransaction(
                "Transaction value must be greater than zero",
            ));
    }

    #[test]
    fn test_created_transaction_is_pending() {
        let transaction = given(vec![created_event()]);
        let record = transaction.record().unwrap();

        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(record.created_at, created_at());
        assert_eq!(record.updated_at, None);
        assert_eq!(record.created_on().to_string(), "2024-03-01");
    }

    #[test]
    fn test_approve_pending() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(TransactionCommand::ApproveTransaction(
                ApproveTransactionPayload {
                    id: tx_id(),
                    at: decided_at(),
                },
            ))
            .then_expect_events(vec![updated_event(TransactionStatus::Approved, None)]);
    }

    #[test]
    fn test_reject_pending() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(TransactionCommand::RejectTransaction(
                RejectTransactionPayload {
                    id: tx_id(),
                    reason: "x".to_owned(),
                    at: decided_at(),
                },
            ))
            .then_expect_events(vec![updated_event(TransactionStatus::Rejected, Some("x"))]);
    }

    #[test]
    fn test_reject_requires_reason() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(TransactionCommand::RejectTransaction(
                RejectTransactionPayload {
                    id: tx_id(),
                    reason: "  ".to_owned(),
                    at: decided_at(),
                },
            ))
            .then_expect_error(TransactionError::InvalidArgument(
                "Rejection reason is required",
            ));
    }

    #[test]
    fn test_approve_already_approved() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![
                created_event(),
                updated_event(TransactionStatus::Approved, None),
            ])
            .when(TransactionCommand::ApproveTransaction(
                ApproveTransactionPayload {
                    id: tx_id(),
                    at: decided_at(),
                },
            ))
            .then_expect_error(TransactionError::InvalidState {
                current: TransactionStatus::Approved,
                requested: TransactionStatus::Approved,
            });
    }

    #[test]
    fn test_reject_already_approved() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![
                created_event(),
                updated_event(TransactionStatus::Approved, None),
            ])
            .when(TransactionCommand::RejectTransaction(
                RejectTransactionPayload {
                    id: tx_id(),
                    reason: "late".to_owned(),
                    at: decided_at(),
                },
            ))
            .then_expect_error(TransactionError::InvalidState {
                current: TransactionStatus::Approved,
                requested: TransactionStatus::Rejected,
            });
    }

    #[test]
    fn test_approve_unknown_transaction() {
        TransactionTestFramework::with(TransactionServices {})
            .given_no_previous_events()
            .when(decision(TransactionStatus::Approved, None))
            .then_expect_error(TransactionError::TransactionNotFound);
    }

    #[test]
    fn test_apply_decision_approves_pending() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(decision(TransactionStatus::Approved, None))
            .then_expect_events(vec![updated_event(TransactionStatus::Approved, None)]);
    }

    #[test]
    fn test_apply_decision_rejects_with_default_reason() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(decision(TransactionStatus::Rejected, None))
            .then_expect_events(vec![updated_event(
                TransactionStatus::Rejected,
                Some(DEFAULT_REJECTION_REASON),
            )]);
    }

    #[test]
    fn test_apply_same_decision_twice_is_noop() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![
                created_event(),
                updated_event(TransactionStatus::Rejected, Some("limit")),
            ])
            .when(decision(TransactionStatus::Rejected, Some("limit")))
            .then_expect_events(vec![]);
    }

    #[test]
    fn test_apply_conflicting_decision_on_terminal_is_noop() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![
                created_event(),
                updated_event(TransactionStatus::Approved, None),
            ])
            .when(decision(TransactionStatus::Rejected, Some("late")))
            .then_expect_events(vec![]);
    }

    #[test]
    fn test_apply_pending_decision_on_pending_is_noop() {
        TransactionTestFramework::with(TransactionServices {})
            .given(vec![created_event()])
            .when(decision(TransactionStatus::Pending, None))
            .then_expect_events(vec![]);
    }

    #[test]
    fn test_replayed_decision_keeps_final_state() {
        let mut transaction = given(vec![created_event()]);

        let first = transaction
            .apply_decision(ApplyDecisionPayload {
                id: tx_id(),
                status: TransactionStatus::Approved,
                reason: None,
                at: decided_at(),
            })
            .unwrap();
        assert_eq!(first.len(), 1);
        for event in first {
            transaction.apply(event);
        }
        let after_first = transaction.clone();

        let second = transaction
            .apply_decision(ApplyDecisionPayload {
                id: tx_id(),
                status: TransactionStatus::Approved,
                reason: None,
                at: Utc::now(),
            })
            .unwrap();

        assert!(second.is_empty());
        assert_eq!(transaction, after_first);
        let record = transaction.record().unwrap();
        assert_eq!(record.status, TransactionStatus::Approved);
        assert_eq!(record.updated_at, Some(decided_at()));
    }
}
