use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO-4217 currency code (three uppercase ASCII letters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, ValidationError> {
        let code = code.into();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(ValidationError::InvalidCurrency(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount of money in integer minor units (pence, cents, ...).
///
/// The unsigned representation makes a negative amount unrepresentable once
/// a request has been validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub currency: Currency,
    pub value: u64,
}

impl MonetaryAmount {
    pub fn new(currency: Currency, value: u64) -> Self {
        Self { currency, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawExpirationDate")]
pub struct ExpirationDate {
    pub year: u32,
    pub month: u32,
}

#[derive(Deserialize)]
struct RawExpirationDate {
    year: u32,
    month: u32,
}

impl ExpirationDate {
    pub fn new(year: u32, month: u32) -> Result<Self, ValidationError> {
        if (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(ValidationError::InvalidMonth(month))
        }
    }
}

impl TryFrom<RawExpirationDate> for ExpirationDate {
    type Error = ValidationError;

    fn try_from(raw: RawExpirationDate) -> Result<Self, Self::Error> {
        Self::new(raw.year, raw.month)
    }
}

/// Primary account number of a card.
///
/// Sensitive: `Debug` is redacted and there is no `Display`, so the number
/// cannot end up in a log line through formatting.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardNumber(String);

impl CardNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Exposes the raw number; only the processor adapters should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_four: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "CardNumber(****{last_four})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub number: CardNumber,
    pub expires_at: ExpirationDate,
}

/// A request to charge `payer` the given `amount` on behalf of `payee`.
///
/// `id` is the idempotency token supplied at the boundary; processors and
/// reconciliation use it to recognise a redelivered claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub payee: String,
    pub amount: MonetaryAmount,
    pub payer: Card,
}
