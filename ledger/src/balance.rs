//! Wallet balance views and change records.

use chrono::{DateTime, Utc};
use payflow_common::{Currency, Money, Reference, Result, WalletId, WalletNumber};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::wallet::Wallet;

/// Balance as reported to the wallet owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    /// Current balance.
    pub amount: Decimal,
    /// Currency.
    pub currency: Currency,
    /// Public wallet number.
    pub wallet_number: WalletNumber,
}

impl From<&Wallet> for BalanceView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            amount: wallet.balance,
            currency: wallet.currency,
            wallet_number: wallet.wallet_number.clone(),
        }
    }
}

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

/// One balance mutation applied inside an atomic scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Wallet affected.
    pub wallet_id: WalletId,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Amount changed (always positive).
    pub amount: Decimal,
    /// Balance before change.
    pub balance_before: Decimal,
    /// Balance after change.
    pub balance_after: Decimal,
    /// Reference of the transaction that caused it.
    pub reference: Reference,
    /// When the change occurred.
    pub timestamp: DateTime<Utc>,
}

impl BalanceChange {
    /// Record moving a wallet from `before` by the signed `delta`. A credit
    /// that would carry the balance to [`Money::limit`] is refused.
    pub fn from_delta(
        wallet_id: WalletId,
        before: Money,
        delta: Decimal,
        reference: Reference,
    ) -> Result<Self> {
        let amount = Money::new(delta.abs(), before.currency);
        let (change_type, after) = if delta.is_sign_negative() {
            (BalanceChangeType::Debit, before.checked_sub(amount)?)
        } else {
            (BalanceChangeType::Credit, before.checked_add(amount)?)
        };

        Ok(Self {
            wallet_id,
            change_type,
            amount: amount.value,
            balance_before: before.value,
            balance_after: after.value,
            reference,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_common::LedgerError;

    fn ngn(value: i64) -> Money {
        Money::new(Decimal::from(value), Currency::Ngn)
    }

    #[test]
    fn test_debit_change() {
        let change = BalanceChange::from_delta(
            WalletId::new(),
            ngn(1000),
            Decimal::from(-300),
            Reference::transfer(),
        )
        .unwrap();

        assert_eq!(change.change_type, BalanceChangeType::Debit);
        assert_eq!(change.amount, Decimal::from(300));
        assert_eq!(change.balance_after, Decimal::from(700));
    }

    #[test]
    fn test_credit_change() {
        let change = BalanceChange::from_delta(
            WalletId::new(),
            ngn(500),
            Decimal::from(300),
            Reference::transfer(),
        )
        .unwrap();

        assert_eq!(change.change_type, BalanceChangeType::Credit);
        assert_eq!(change.balance_after, Decimal::from(800));
    }

    #[test]
    fn test_credit_past_limit_refused() {
        let result = BalanceChange::from_delta(
            WalletId::new(),
            Money::new(Money::limit() - Decimal::ONE, Currency::Ngn),
            Decimal::ONE,
            Reference::transfer(),
        );

        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
    }
}
