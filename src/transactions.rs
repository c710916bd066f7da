use std::sync::Arc;

use chrono::Utc;
use cqrs_es::{AggregateError, CqrsFramework, EventStore, persist::PersistedEventStore};
use derive_more::Display;
use rust_decimal::Decimal;
use sqlite_es::{SqliteEventRepository, sqlite_aggregate_cqrs};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    antifraud::screening::EvaluationSubmitter,
    domain::{
        account::{
            aggregate::{Account, AccountServices, acc_aggregate_id},
            command::{
                AccountCommand, DeactivateAccountPayload, OpenAccountPayload,
                ReactivateAccountPayload,
            },
            error::AccountError,
        },
        money::{Currency, Money},
        props::{AccountId, TransactionId, TransferTypeId},
        transaction::{
            aggregate::TransactionRecord,
            command::{CreateTransactionPayload, TransactionCommand},
            error::TransactionError,
        },
    },
    query::transaction::{
        TRANSACTION_VIEWS_TABLE, TransactionView, TransactionViewRepository, list_transactions,
        load_transaction_view, pending_transaction_ids,
    },
    store::TransactionRepository,
};

#[derive(Debug, Clone, PartialEq, Display)]
pub enum ServiceError {
    #[display("Validation error: {_0}")]
    Validation(String),
    #[display("Invalid state: {_0}")]
    InvalidState(String),
    #[display("Not found: {_0}")]
    NotFound(String),
    #[display("Transient infrastructure error: {_0}")]
    Transient(String),
}

impl std::error::Error for ServiceError {}

impl From<AggregateError<TransactionError>> for ServiceError {
    fn from(e: AggregateError<TransactionError>) -> Self {
        match e {
            AggregateError::UserError(e) => match e {
                TransactionError::TransactionNotFound => ServiceError::NotFound(e.to_string()),
                TransactionError::InvalidState { .. } => ServiceError::InvalidState(e.to_string()),
                TransactionError::DuplicateTransaction
                | TransactionError::InvalidTransaction(_)
                | TransactionError::InvalidArgument(_) => ServiceError::Validation(e.to_string()),
            },
            e => ServiceError::Transient(e.to_string()),
        }
    }
}

impl From<AggregateError<AccountError>> for ServiceError {
    fn from(e: AggregateError<AccountError>) -> Self {
        match e {
            AggregateError::UserError(e) => match e {
                AccountError::AccountNotFound => ServiceError::NotFound(e.to_string()),
                AccountError::DuplicateAccount | AccountError::InvalidArgument(_) => {
                    ServiceError::Validation(e.to_string())
                }
            },
            e => ServiceError::Transient(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Transient(e.to_string())
    }
}

impl From<cqrs_es::persist::PersistenceError> for ServiceError {
    fn from(e: cqrs_es::persist::PersistenceError) -> Self {
        ServiceError::Transient(e.to_string())
    }
}

/// Unvalidated input of a transfer, as received from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTransactionRequest {
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub transfer_type_id: i64,
    pub value: Decimal,
    pub currency: Option<String>,
}

// Entry point for callers. Creation is durable and synchronous, evaluation
// runs in the background and its decision comes back through the consumer.
pub struct TransactionService {
    account_cqrs: CqrsFramework<Account, PersistedEventStore<SqliteEventRepository, Account>>,
    accounts_store: PersistedEventStore<SqliteEventRepository, Account>,
    transactions: Arc<dyn TransactionRepository>,
    views: TransactionViewRepository,
    sqlite_pool: SqlitePool,
    evaluations: EvaluationSubmitter,
    default_currency: Currency,
}

impl TransactionService {
    /// Expects the tables created by [`crate::store::init_store`].
    pub fn new(
        sqlite_pool: SqlitePool,
        transactions: Arc<dyn TransactionRepository>,
        evaluations: EvaluationSubmitter,
        default_currency: Currency,
    ) -> Self {
        let account_cqrs = sqlite_aggregate_cqrs(sqlite_pool.clone(), vec![], AccountServices {});
        let accounts_store =
            PersistedEventStore::new_aggregate_store(SqliteEventRepository::new(sqlite_pool.clone()));
        let views = TransactionViewRepository::new(TRANSACTION_VIEWS_TABLE, sqlite_pool.clone());

        TransactionService {
            account_cqrs,
            accounts_store,
            transactions,
            views,
            sqlite_pool,
            evaluations,
            default_currency,
        }
    }

    pub async fn open_account(
        &self,
        account_id: Uuid,
        account_number: &str,
        holder_name: &str,
    ) -> Result<AccountId, ServiceError> {
        let account_id = require_account_id(account_id, "accountId")?;

        self.account_cqrs
            .execute(
                &acc_aggregate_id(&account_id),
                AccountCommand::OpenAccount(OpenAccountPayload {
                    account_id,
                    account_number: account_number.to_owned(),
                    holder_name: holder_name.to_owned(),
                }),
            )
            .await?;

        info!("Account {} opened", account_id);
        Ok(account_id)
    }

    pub async fn deactivate_account(&self, account_id: Uuid) -> Result<(), ServiceError> {
        let account_id = require_account_id(account_id, "accountId")?;

        self.account_cqrs
            .execute(
                &acc_aggregate_id(&account_id),
                AccountCommand::DeactivateAccount(DeactivateAccountPayload { account_id }),
            )
            .await?;

        Ok(())
    }

    pub async fn reactivate_account(&self, account_id: Uuid) -> Result<(), ServiceError> {
        let account_id = require_account_id(account_id, "accountId")?;

        self.account_cqrs
            .execute(
                &acc_aggregate_id(&account_id),
                AccountCommand::ReactivateAccount(ReactivateAccountPayload { account_id }),
            )
            .await?;

        Ok(())
    }

    /// Persists a new `pending` transaction and hands it to the evaluation
    /// queue. Returns as soon as the transaction is durable.
    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> Result<TransactionRecord, ServiceError> {
        let payload = self.validate(request)?;

        self.require_active_account(&payload.source_account_id, "Source")
            .await?;
        self.require_active_account(&payload.target_account_id, "Target")
            .await?;

        let id = payload.id;
        let created = TransactionRecord::pending(&payload);
        self.transactions
            .execute(&id, TransactionCommand::CreateTransaction(payload))
            .await?;

        let record = match self.transactions.find_by_id(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Transaction {} not readable right after creation", id);
                created
            }
            Err(e) => {
                warn!("Transaction {} created but not read back: {}", id, e);
                created
            }
        };

        info!("Transaction {} created for {}", id, record.value);

        // The transaction is durable already, a stopped queue is picked up by
        // the pending sweep on the next start.
        if let Err(e) = self.evaluations.submit(id) {
            error!("Transaction {} not submitted for evaluation: {}", id, e);
        }

        Ok(record)
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<TransactionView, ServiceError> {
        let id = TransactionId::try_from(id)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        load_transaction_view(&self.views, &id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", id)))
    }

    pub async fn list_transactions(&self) -> Result<Vec<TransactionView>, ServiceError> {
        Ok(list_transactions(&self.sqlite_pool).await?)
    }

    /// Puts every transaction still `pending` back on the evaluation queue.
    pub async fn resubmit_pending(&self) -> Result<usize, ServiceError> {
        let pending = pending_transaction_ids(&self.sqlite_pool).await?;

        for id in &pending {
            self.evaluations
                .submit(*id)
                .map_err(|e| ServiceError::Transient(e.to_string()))?;
        }

        if !pending.is_empty() {
            info!("Resubmitted {} pending transactions", pending.len());
        }

        Ok(pending.len())
    }

    fn validate(
        &self,
        request: CreateTransactionRequest,
    ) -> Result<CreateTransactionPayload, ServiceError> {
        let source_account_id = require_account_id(request.source_account_id, "sourceAccountId")?;
        let target_account_id = require_account_id(request.target_account_id, "targetAccountId")?;

        if source_account_id == target_account_id {
            return Err(ServiceError::Validation(
                "sourceAccountId and targetAccountId must differ".to_owned(),
            ));
        }

        let transfer_type_id = TransferTypeId::try_from(request.transfer_type_id)
            .map_err(|e| ServiceError::Validation(format!("transferTypeId: {}", e)))?;

        if request.value <= Decimal::ZERO {
            return Err(ServiceError::Validation(format!(
                "value must be greater than zero, got {}",
                request.value
            )));
        }

        let currency = match request.currency.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code
                .parse::<Currency>()
                .map_err(|e| ServiceError::Validation(format!("currency: {}", e)))?,
            _ => self.default_currency.clone(),
        };

        let value = Money::new(request.value, currency)
            .map_err(|e| ServiceError::Validation(format!("value: {}", e)))?;

        Ok(CreateTransactionPayload {
            id: TransactionId::new(),
            source_account_id,
            target_account_id,
            transfer_type_id,
            value,
            created_at: Utc::now(),
        })
    }

    async fn require_active_account(
        &self,
        account_id: &AccountId,
        role: &str,
    ) -> Result<(), ServiceError> {
        let account = self
            .accounts_store
            .load_aggregate(&acc_aggregate_id(account_id))
            .await?
            .aggregate;

        if !account.exists() {
            return Err(ServiceError::NotFound(format!(
                "{} account {}",
                role, account_id
            )));
        }

        if !account.is_active() {
            return Err(ServiceError::Validation(format!(
                "{} account {} is inactive",
                role, account_id
            )));
        }

        debug!("{} account {} is active", role, account_id);
        Ok(())
    }
}

fn require_account_id(id: Uuid, field: &str) -> Result<AccountId, ServiceError> {
    AccountId::try_from(id).map_err(|_| ServiceError::Validation(format!("{} must be set", field)))
}
