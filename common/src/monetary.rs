//! Monetary types for the PayFlow ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Currencies a wallet may be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Nigerian naira.
    #[default]
    Ngn,
    /// US dollar.
    Usd,
    /// Euro.
    Eur,
    /// Pound sterling.
    Gbp,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 4] = [Currency::Ngn, Currency::Usd, Currency::Eur, Currency::Gbp];

    /// Get the ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// Get the number of minor-unit decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::Ngn | Currency::Usd | Currency::Eur | Currency::Gbp => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LedgerError::InvalidInput {
                message: format!("Unsupported currency: {s}"),
                field: Some("currency".to_string()),
            })
    }
}

/// Amounts and balances stay below 10^18 whole units, the range of the
/// ledger's `NUMERIC(20, 2)` columns.
const MAX_WHOLE_UNITS: i64 = 1_000_000_000_000_000_000;

/// A monetary amount with currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value.
    pub value: Decimal,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Exclusive upper bound on any amount or balance.
    pub fn limit() -> Decimal {
        Decimal::from(MAX_WHOLE_UNITS)
    }

    /// Validate an amount for a ledger operation in `currency`: strictly
    /// positive and no finer than the currency's minor unit. No rounding is
    /// applied.
    pub fn checked_amount(value: Decimal, currency: Currency) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                message: format!("Amount must be greater than 0, got {value}"),
            });
        }

        if value >= Self::limit() {
            return Err(LedgerError::InvalidAmount {
                message: format!("Amount must be less than {}", Self::limit()),
            });
        }

        let places = currency.decimal_places();
        if value.normalize().scale() > places {
            return Err(LedgerError::InvalidAmount {
                message: format!(
                    "Amount {value} has more than {places} decimal places for {currency}"
                ),
            });
        }

        Ok(Self::new(value, currency))
    }

    /// Add another amount of the same currency. A sum at or above
    /// [`Money::limit`] is refused as `InvalidAmount`.
    pub fn checked_add(&self, other: Money) -> Result<Money, LedgerError> {
        self.ensure_same_currency(&other)?;
        let value = self
            .value
            .checked_add(other.value)
            .filter(|sum| *sum < Self::limit())
            .ok_or_else(|| LedgerError::InvalidAmount {
                message: format!(
                    "Adding {} to {} would reach the limit of {}",
                    other.value,
                    self.value,
                    Self::limit()
                ),
            })?;
        Ok(Money::new(value, self.currency))
    }

    /// Subtract another amount of the same currency.
    pub fn checked_sub(&self, other: Money) -> Result<Money, LedgerError> {
        self.ensure_same_currency(&other)?;
        let value = self
            .value
            .checked_sub(other.value)
            .ok_or_else(|| LedgerError::Internal("Amount overflow".to_string()))?;
        Ok(Money::new(value, self.currency))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), LedgerError> {
        if self.currency != other.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}
