use std::{fmt, str::FromStr};

use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Display)]
pub enum MoneyError {
    #[display("Amount cannot be negative: {_0}")]
    NegativeAmount(Decimal),
    #[display("Invalid currency code: {_0:?}")]
    InvalidCurrency(String),
    #[display("Cannot combine different currencies: {left} and {right}")]
    CurrencyMismatch { left: Currency, right: Currency },
}

impl std::error::Error for MoneyError {}

/// ISO-4217 style three letter code, always upper case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Display)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn usd() -> Self {
        Currency("USD".to_owned())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(s.to_owned()));
        }
        Ok(Currency(code.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Non-negative amount in a single currency.
///
/// Arithmetic and ordering are only defined between equal currencies; mixing
/// currencies is reported as [`MoneyError::CurrencyMismatch`] instead of being
/// silently coerced.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(try_from = "RawMoney")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct RawMoney {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<RawMoney> for Money {
    type Error = MoneyError;

    fn try_from(raw: RawMoney) -> Result<Self, Self::Error> {
        Money::new(raw.amount, raw.currency)
    }
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount < Decimal::ZERO {
            return Err(MoneyError::NegativeAmount(amount));
        }
        Ok(Money { amount, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        Money {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        Ok(Money {
            amount: self.amount + other.amount,
            currency: self.currency.clone(),
        })
    }

    pub fn is_greater_than(&self, other: &Money) -> Result<bool, MoneyError> {
        self.require_same_currency(other)?;
        Ok(self.amount > other.amount)
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::usd()).unwrap()
    }

    fn eur(amount: Decimal) -> Money {
        Money::new(amount, "eur".parse().unwrap()).unwrap()
    }

    #[test]
    fn negative_amount_is_rejected() {
        assert_eq!(
            Money::new(dec!(-0.01), Currency::usd()),
            Err(MoneyError::NegativeAmount(dec!(-0.01)))
        );
        assert!(Money::new(dec!(0), Currency::usd()).is_ok());
    }

    #[test]
    fn currency_code_is_normalized() {
        let currency: Currency = " usd ".parse().unwrap();
        assert_eq!(currency, Currency::usd());
        assert!("US".parse::<Currency>().is_err());
        assert!("U5D".parse::<Currency>().is_err());
    }

    #[test]
    fn adds_at_full_precision() {
        let sum = usd(dec!(19999.99)).add(&usd(dec!(0.01))).unwrap();
        assert_eq!(sum.amount(), dec!(20000.00));
        assert_eq!(sum.currency(), &Currency::usd());
    }

    #[test]
    fn compares_within_currency() {
        assert!(usd(dec!(2000.01)).is_greater_than(&usd(dec!(2000))).unwrap());
        assert!(!usd(dec!(2000)).is_greater_than(&usd(dec!(2000))).unwrap());
        assert!(!usd(dec!(1999.99)).is_greater_than(&usd(dec!(2000))).unwrap());
    }

    #[test]
    fn mixing_currencies_fails_fast() {
        let err = usd(dec!(1)).add(&eur(dec!(1))).unwrap_err();
        assert!(matches!(err, MoneyError::CurrencyMismatch { .. }));
        assert!(usd(dec!(5)).is_greater_than(&eur(dec!(1))).is_err());
    }

    #[test]
    fn serializes_amount_without_losing_precision() {
        let money = usd(dec!(1999.99));
        let json = serde_json::to_string(&money).unwrap();
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);
    }

    #[test]
    fn negative_amount_does_not_deserialize() {
        let json = r#"{"amount":"-5","currency":"USD"}"#;
        assert!(serde_json::from_str::<Money>(json).is_err());
    }

    #[test]
    fn displays_amount_and_currency() {
        assert_eq!(usd(dec!(2000)).to_string(), "2000 USD");
    }
}
