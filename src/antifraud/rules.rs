use async_trait::async_trait;
use chrono::NaiveDate;
use derive_more::{Display, From};
use rust_decimal::{Decimal, dec};
use tracing::{debug, warn};

use crate::domain::{
    money::{Currency, Money, MoneyError},
    props::{AccountId, TransactionId, TransactionStatus},
    transaction::aggregate::TransactionRecord,
};

pub const DEFAULT_MAX_TRANSACTION_AMOUNT: Decimal = dec!(2000);
pub const DEFAULT_MAX_DAILY_AMOUNT: Decimal = dec!(20000);

/// Statuses that count towards the daily cumulative cap.
pub const ACCUMULATING_STATUSES: [TransactionStatus; 2] =
    [TransactionStatus::Pending, TransactionStatus::Approved];

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved,
    Rejected { reason: String },
}

impl Verdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Verdict::Rejected {
            reason: reason.into(),
        }
    }

    pub fn should_reject(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            Verdict::Approved => TransactionStatus::Approved,
            Verdict::Rejected { .. } => TransactionStatus::Rejected,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Approved => None,
            Verdict::Rejected { reason } => Some(reason),
        }
    }
}

/// Window of a daily accumulation lookup: one source account, one UTC day.
#[derive(Debug)]
pub struct SameDayQuery<'a> {
    pub account_id: &'a AccountId,
    pub day: NaiveDate,
    pub statuses: &'a [TransactionStatus],
    pub currency: &'a Currency,
    /// The transaction under evaluation, which must not count itself.
    pub excluding: &'a TransactionId,
}

#[derive(Debug, Display, From)]
pub enum AccumulationError {
    #[display("Daily accumulation lookup failed: {_0}")]
    #[from(ignore)]
    Lookup(String),
    #[display("{_0}")]
    Money(MoneyError),
}

impl std::error::Error for AccumulationError {}

#[async_trait]
pub trait DailyAccumulation: Send + Sync {
    async fn sum_same_day(&self, query: &SameDayQuery<'_>) -> Result<Money, AccumulationError>;
}

#[derive(Debug, Display, From)]
pub enum EvaluationError {
    #[display("{_0}")]
    Accumulation(AccumulationError),
    #[display("{_0}")]
    Money(MoneyError),
}

impl std::error::Error for EvaluationError {}

#[derive(Debug, Clone, PartialEq)]
pub struct FraudRules {
    max_transaction_amount: Decimal,
    max_daily_amount: Decimal,
}

impl Default for FraudRules {
    fn default() -> Self {
        FraudRules::new(DEFAULT_MAX_TRANSACTION_AMOUNT, DEFAULT_MAX_DAILY_AMOUNT)
    }
}

impl FraudRules {
    pub fn new(max_transaction_amount: Decimal, max_daily_amount: Decimal) -> Self {
        FraudRules {
            max_transaction_amount,
            max_daily_amount,
        }
    }

    /// Runs the rules in order, first match wins. The daily lookup is only
    /// performed when the per-transaction cap passes.
    pub async fn evaluate(
        &self,
        transaction: &TransactionRecord,
        accumulation: &dyn DailyAccumulation,
    ) -> Result<Verdict, EvaluationError> {
        let value = &transaction.value;
        let currency = value.currency();

        let max_transaction = Money::new(self.max_transaction_amount, currency.clone())?;
        if value.is_greater_than(&max_transaction)? {
            return Ok(Verdict::rejected(format!(
                "Transaction amount {} exceeds the maximum allowed amount of {}",
                value, max_transaction
            )));
        }

        let accumulated = accumulation
            .sum_same_day(&SameDayQuery {
                account_id: &transaction.source_account_id,
                day: transaction.created_on(),
                statuses: &ACCUMULATING_STATUSES,
                currency,
                excluding: &transaction.id,
            })
            .await?;

        let projected = accumulated.add(value)?;
        let max_daily = Money::new(self.max_daily_amount, currency.clone())?;
        if projected.is_greater_than(&max_daily)? {
            return Ok(Verdict::rejected(format!(
                "Daily accumulated amount {} would exceed the maximum daily limit of {}. Current daily total: {}",
                projected, max_daily, accumulated
            )));
        }

        debug!(
            "{} approved, daily total would be {}",
            transaction.id, projected
        );

        Ok(Verdict::Approved)
    }

    /// Like [`FraudRules::evaluate`], but any failure turns into a rejection.
    pub async fn assess(
        &self,
        transaction: &TransactionRecord,
        accumulation: &dyn DailyAccumulation,
    ) -> Verdict {
        match self.evaluate(transaction, accumulation).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    "Evaluation of {} failed, rejecting: {}",
                    transaction.id, e
                );
                Verdict::rejected(format!("Validation error: {}", e))
            }
        }
    }
}
