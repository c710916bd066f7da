use std::{env, str::FromStr, time::Duration};

use color_eyre::eyre::{Result, WrapErr, bail};
use rust_decimal::Decimal;

use crate::{
    antifraud::rules::{DEFAULT_MAX_DAILY_AMOUNT, DEFAULT_MAX_TRANSACTION_AMOUNT, FraudRules},
    domain::money::Currency,
};

pub const DEFAULT_DECISION_TOPIC: &str = "transaction-validation-response";
pub const DEFAULT_CONSUMER_GROUP: &str = "antifraud-consumer-group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Memory,
    Kafka,
}

impl FromStr for TransportKind {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportKind::Memory),
            "kafka" => Ok(TransportKind::Kafka),
            other => bail!("Unknown transport '{}', expected 'memory' or 'kafka'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` means a fresh sqlite file per run.
    pub database_url: Option<String>,
    pub decision_topic: String,
    pub consumer_group: String,
    pub transport: TransportKind,
    pub kafka_brokers: String,
    pub kafka_client_id: String,
    pub max_transaction_amount: Decimal,
    pub max_daily_amount: Decimal,
    pub default_currency: Currency,
    pub retry_backoff: Duration,
    pub drain_timeout: Duration,
}

impl Settings {
    /// Reads the environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        Ok(Settings {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            decision_topic: var("DECISION_TOPIC", DEFAULT_DECISION_TOPIC),
            consumer_group: var("CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            transport: var("TRANSPORT", "memory").parse()?,
            kafka_brokers: var("KAFKA_BROKERS", "localhost:9092"),
            kafka_client_id: var("KAFKA_CLIENT_ID", "antifraud-service"),
            max_transaction_amount: parse(
                "MAX_TRANSACTION_AMOUNT",
                lookup("MAX_TRANSACTION_AMOUNT"),
                DEFAULT_MAX_TRANSACTION_AMOUNT,
            )?,
            max_daily_amount: parse(
                "MAX_DAILY_AMOUNT",
                lookup("MAX_DAILY_AMOUNT"),
                DEFAULT_MAX_DAILY_AMOUNT,
            )?,
            default_currency: parse("DEFAULT_CURRENCY", lookup("DEFAULT_CURRENCY"), Currency::usd())?,
            retry_backoff: Duration::from_millis(parse(
                "RETRY_BACKOFF_MS",
                lookup("RETRY_BACKOFF_MS"),
                250,
            )?),
            drain_timeout: Duration::from_millis(parse(
                "DRAIN_TIMEOUT_MS",
                lookup("DRAIN_TIMEOUT_MS"),
                10_000,
            )?),
        })
    }

    pub fn fraud_rules(&self) -> Result<FraudRules> {
        if self.max_transaction_amount <= Decimal::ZERO || self.max_daily_amount <= Decimal::ZERO {
            bail!("Fraud thresholds must be greater than zero");
        }
        Ok(FraudRules::new(
            self.max_transaction_amount,
            self.max_daily_amount,
        ))
    }
}

fn parse<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
