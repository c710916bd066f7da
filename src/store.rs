use std::sync::Arc;

use async_trait::async_trait;
use cqrs_es::{AggregateError, CqrsFramework, EventStore, persist::PersistedEventStore};
use sqlite_es::{SqliteEventRepository, init_tables, sqlite_aggregate_cqrs};
use sqlx::SqlitePool;

use crate::{
    domain::{
        props::TransactionId,
        transaction::{
            aggregate::{Transaction, TransactionRecord, TransactionServices, tx_aggregate_id},
            command::TransactionCommand,
            error::TransactionError,
        },
    },
    query::transaction::{
        TRANSACTION_VIEWS_TABLE, TransactionViewRepository, init_transaction_views_table,
        transaction_query,
    },
};

pub(crate) type TransactionCqrs =
    CqrsFramework<Transaction, PersistedEventStore<SqliteEventRepository, Transaction>>;

/// Where transactions live between evaluation and decision handling.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, AggregateError<TransactionError>>;

    /// Runs `command` against the transaction and persists whatever it emits.
    /// A command that emits nothing leaves the store untouched.
    async fn execute(
        &self,
        id: &TransactionId,
        command: TransactionCommand,
    ) -> Result<(), AggregateError<TransactionError>>;
}

/// Event-sourced transactions on top of the sqlite event store.
pub struct EventSourcedTransactions {
    cqrs: Arc<TransactionCqrs>,
    store: PersistedEventStore<SqliteEventRepository, Transaction>,
}

impl EventSourcedTransactions {
    /// Transactions persisted in `sqlite_pool`, projected into the
    /// transaction views on every command.
    pub fn from_pool(sqlite_pool: SqlitePool) -> Self {
        let views = Arc::new(TransactionViewRepository::new(
            TRANSACTION_VIEWS_TABLE,
            sqlite_pool.clone(),
        ));
        let cqrs = sqlite_aggregate_cqrs(
            sqlite_pool.clone(),
            vec![Box::new(transaction_query(views))],
            TransactionServices {},
        );
        let store =
            PersistedEventStore::new_aggregate_store(SqliteEventRepository::new(sqlite_pool));

        EventSourcedTransactions::new(Arc::new(cqrs), store)
    }

    pub fn new(
        cqrs: Arc<TransactionCqrs>,
        store: PersistedEventStore<SqliteEventRepository, Transaction>,
    ) -> Self {
        EventSourcedTransactions { cqrs, store }
    }
}

#[async_trait]
impl TransactionRepository for EventSourcedTransactions {
    async fn find_by_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, AggregateError<TransactionError>> {
        let transaction = self
            .store
            .load_aggregate(&tx_aggregate_id(id))
            .await?
            .aggregate;

        Ok(transaction.record().cloned())
    }

    async fn execute(
        &self,
        id: &TransactionId,
        command: TransactionCommand,
    ) -> Result<(), AggregateError<TransactionError>> {
        self.cqrs.execute(&tx_aggregate_id(id), command).await
    }
}

/// Creates the event store tables and the transaction views table.
pub async fn init_store(sqlite_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    init_tables(sqlite_pool).await?;
    init_transaction_views_table(sqlite_pool).await
}

/// Whether retrying the same operation later could succeed.
pub fn is_transient<E: std::error::Error>(e: &AggregateError<E>) -> bool {
    match e {
        AggregateError::UserError(_) | AggregateError::DeserializationError(_) => false,
        AggregateError::AggregateConflict
        | AggregateError::DatabaseConnectionError(_)
        | AggregateError::UnexpectedError(_) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::{Decimal, dec};
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    use super::*;
    use crate::{
        domain::{
            money::{Currency, Money},
            props::{AccountId, TransactionStatus, TransferTypeId},
            transaction::command::{ApplyDecisionPayload, CreateTransactionPayload},
        },
        query::transaction::list_transactions,
    };

    pub(crate) async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_store(&pool).await.unwrap();
        pool
    }

    pub(crate) fn event_sourced(pool: &SqlitePool) -> EventSourcedTransactions {
        EventSourcedTransactions::from_pool(pool.clone())
    }

    pub(crate) async fn create_pending(
        repo: &dyn TransactionRepository,
        source: AccountId,
        amount: Decimal,
    ) -> TransactionRecord {
        let id = TransactionId::new();
        repo.execute(
            &id,
            TransactionCommand::CreateTransaction(CreateTransactionPayload {
                id,
                source_account_id: source,
                target_account_id: AccountId::try_from(Uuid::new_v4()).unwrap(),
                transfer_type_id: TransferTypeId::try_from(1).unwrap(),
                value: Money::new(amount, Currency::usd()).unwrap(),
                created_at: Utc::now(),
            }),
        )
        .await
        .unwrap();

        repo.find_by_id(&id).await.unwrap().unwrap()
    }

    /// Fails the first `failures` commands with a connection error.
    pub(crate) struct FlakyTransactions<R> {
        pub inner: R,
        pub failures: AtomicUsize,
    }

    impl<R> FlakyTransactions<R> {
        pub(crate) fn new(inner: R, failures: usize) -> Self {
            FlakyTransactions {
                inner,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl<R: TransactionRepository> TransactionRepository for FlakyTransactions<R> {
        async fn find_by_id(
            &self,
            id: &TransactionId,
        ) -> Result<Option<TransactionRecord>, AggregateError<TransactionError>> {
            self.inner.find_by_id(id).await
        }

        async fn execute(
            &self,
            id: &TransactionId,
            command: TransactionCommand,
        ) -> Result<(), AggregateError<TransactionError>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AggregateError::DatabaseConnectionError(Box::new(
                    std::io::Error::other("database is locked"),
                )));
            }
            self.inner.execute(id, command).await
        }
    }

    #[tokio::test]
    async fn unknown_transaction_is_absent() {
        let pool = memory_pool().await;
        let repo = event_sourced(&pool);

        assert_eq!(repo.find_by_id(&TransactionId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn created_transaction_is_pending_and_projected() {
        let pool = memory_pool().await;
        let repo = event_sourced(&pool);
        let source = AccountId::try_from(Uuid::new_v4()).unwrap();

        let record = create_pending(&repo, source, dec!(150)).await;

        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(record.source_account_id, source);
        let views = list_transactions(&pool).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].transaction_id, *record.id);
        assert_eq!(views[0].value, dec!(150));
    }

    #[tokio::test]
    async fn replayed_decision_is_absorbed() {
        let pool = memory_pool().await;
        let repo = event_sourced(&pool);
        let record =
            create_pending(&repo, AccountId::try_from(Uuid::new_v4()).unwrap(), dec!(10)).await;
        let approve = || {
            TransactionCommand::ApplyDecision(ApplyDecisionPayload {
                id: record.id,
                status: TransactionStatus::Approved,
                reason: None,
                at: Utc::now(),
            })
        };

        repo.execute(&record.id, approve()).await.unwrap();
        let first = repo.find_by_id(&record.id).await.unwrap().unwrap();
        repo.execute(&record.id, approve()).await.unwrap();
        let second = repo.find_by_id(&record.id).await.unwrap().unwrap();

        assert_eq!(first.status, TransactionStatus::Approved);
        assert_eq!(first, second);
    }

    #[test]
    fn classifies_aggregate_errors() {
        assert!(!is_transient(&AggregateError::UserError(
            TransactionError::TransactionNotFound
        )));
        assert!(is_transient::<TransactionError>(
            &AggregateError::AggregateConflict
        ));
        assert!(is_transient::<TransactionError>(
            &AggregateError::DatabaseConnectionError(Box::new(std::io::Error::other("down")))
        ));
    }
}
