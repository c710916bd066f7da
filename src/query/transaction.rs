use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cqrs_es::{
    EventEnvelope, View,
    persist::{GenericQuery, PersistenceError, ViewRepository},
};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlite_es::SqliteViewRepository;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    antifraud::rules::{AccumulationError, DailyAccumulation, SameDayQuery},
    domain::{
        money::{Money, MoneyError},
        props::{TransactionId, TransactionStatus},
        transaction::{
            aggregate::{Transaction, tx_aggregate_id},
            event::TransactionEvent,
        },
    },
};

pub const TRANSACTION_VIEWS_TABLE: &str = "transaction_views";

pub(crate) type TransactionViewRepository = SqliteViewRepository<TransactionView, Transaction>;

pub(crate) type TransactionQuery =
    GenericQuery<TransactionViewRepository, TransactionView, Transaction>;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionView {
    pub transaction_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub transfer_type_id: i64,
    pub value: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_on: Option<NaiveDate>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TransactionView {
    pub fn value(&self) -> Result<Money, MoneyError> {
        Money::new(self.value, self.currency.parse()?)
    }
}

impl View<Transaction> for TransactionView {
    fn update(&mut self, event: &EventEnvelope<Transaction>) {
        match &event.payload {
            TransactionEvent::TransactionCreated(p) => {
                self.transaction_id = *p.id;
                self.source_account_id = *p.source_account_id;
                self.target_account_id = *p.target_account_id;
                self.transfer_type_id = *p.transfer_type_id;
                self.value = p.value.amount();
                self.currency = p.value.currency().code().to_owned();
                self.status = TransactionStatus::Pending;
                self.created_at = p.created_at;
                self.created_on = Some(p.created_at.date_naive());
            }
            TransactionEvent::TransactionStatusUpdated(p) => {
                self.status = p.new_status;
                self.reason = p.reason.clone();
                self.updated_at = Some(p.updated_at);
            }
        }
    }
}

pub(crate) fn transaction_query(repository: Arc<TransactionViewRepository>) -> TransactionQuery {
    let mut query = TransactionQuery::new(repository);
    query.use_error_handler(Box::new(|e| {
        error!("Failed to update transaction view: {}", e)
    }));
    query
}

pub async fn init_transaction_views_table(sqlite_pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transaction_views
            (
                view_id text                        NOT NULL,
                version bigint CHECK (version >= 0) NOT NULL,
                payload json                        NOT NULL,
                PRIMARY KEY (view_id)
            );",
    )
    .execute(sqlite_pool)
    .await?;

    Ok(())
}

pub(crate) async fn load_transaction_view(
    repository: &TransactionViewRepository,
    id: &TransactionId,
) -> Result<Option<TransactionView>, PersistenceError> {
    repository.load(&tx_aggregate_id(id)).await
}

/// All transactions in the order they were first projected.
pub async fn list_transactions(sqlite_pool: &SqlitePool) -> Result<Vec<TransactionView>, sqlx::Error> {
    let mut views = Vec::new();

    let mut query =
        sqlx::query("SELECT payload FROM transaction_views ORDER BY rowid").fetch(sqlite_pool);
    while let Some(row) = query.try_next().await? {
        let s: String = row.get("payload");
        match serde_json::from_str::<TransactionView>(&s) {
            Ok(view) => views.push(view),
            Err(e) => warn!("Skipping unreadable transaction view: {}", e),
        }
    }

    Ok(views)
}

pub async fn pending_transaction_ids(
    sqlite_pool: &SqlitePool,
) -> Result<Vec<TransactionId>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT json_extract(payload, '$.transaction_id') AS transaction_id
            FROM transaction_views
            WHERE json_extract(payload, '$.status') = 'pending'
            ORDER BY rowid",
    )
    .fetch_all(sqlite_pool)
    .await?;

    let ids = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("transaction_id").ok())
        .filter_map(|raw| Uuid::parse_str(&raw).ok())
        .filter_map(|uuid| TransactionId::try_from(uuid).ok())
        .collect();

    Ok(ids)
}

pub async fn count_pending(sqlite_pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS pending FROM transaction_views
            WHERE json_extract(payload, '$.status') = 'pending'",
    )
    .fetch_one(sqlite_pool)
    .await?;

    row.try_get("pending")
}

/// Daily accumulation served from the transaction views.
pub struct SqliteDailyAccumulation {
    sqlite_pool: SqlitePool,
}

impl SqliteDailyAccumulation {
    pub fn new(sqlite_pool: SqlitePool) -> Self {
        SqliteDailyAccumulation { sqlite_pool }
    }
}

#[async_trait]
impl DailyAccumulation for SqliteDailyAccumulation {
    async fn sum_same_day(&self, query: &SameDayQuery<'_>) -> Result<Money, AccumulationError> {
        let rows = sqlx::query(
            "SELECT payload FROM transaction_views
                WHERE json_extract(payload, '$.source_account_id') = ?
                AND json_extract(payload, '$.created_on') = ?",
        )
        .bind(query.account_id.to_string())
        .bind(query.day.to_string())
        .fetch_all(&self.sqlite_pool)
        .await
        .map_err(|e| AccumulationError::Lookup(e.to_string()))?;

        let mut total = Money::zero(query.currency.clone());
        for row in rows {
            let payload: String = row
                .try_get("payload")
                .map_err(|e| AccumulationError::Lookup(e.to_string()))?;
            let view: TransactionView = serde_json::from_str(&payload)
                .map_err(|e| AccumulationError::Lookup(e.to_string()))?;

            if view.transaction_id == **query.excluding || !query.statuses.contains(&view.status) {
                continue;
            }

            total = total.add(&view.value()?)?;
        }

        Ok(total)
    }
}
