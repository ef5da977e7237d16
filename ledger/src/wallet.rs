//! Wallet definitions for the ledger.

use chrono::{DateTime, Utc};
use payflow_common::{Currency, Money, TransactionId, UserId, WalletId, WalletNumber};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The balance-holding account of exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning user. One wallet per user.
    pub owner: UserId,
    /// Public 10-digit number used to address transfers.
    pub wallet_number: WalletNumber,
    /// Current balance. Never negative.
    pub balance: Decimal,
    /// Wallet currency.
    pub currency: Currency,
    /// Whether the wallet may move funds.
    pub is_active: bool,
    /// Transactions touching this wallet, oldest first.
    pub transactions: Vec<TransactionId>,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new, empty, active wallet.
    pub fn new(owner: UserId, wallet_number: WalletNumber, currency: Currency) -> Self {
        let now = Utc::now();

        Self {
            id: WalletId::new(),
            owner,
            wallet_number,
            balance: Decimal::ZERO,
            currency,
            is_active: true,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance as money.
    pub fn balance_money(&self) -> Money {
        Money::new(self.balance, self.currency)
    }

    /// Check if the wallet can take part in a transaction.
    pub fn can_transact(&self) -> bool {
        self.is_active
    }

    /// Check if the wallet holds at least `amount`.
    pub fn has_sufficient_balance(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Check if `user` owns this wallet.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Wallet {
        Wallet::new(
            UserId::new("user-1"),
            WalletNumber::parse("1234567890").unwrap(),
            Currency::Ngn,
        )
    }

    #[test]
    fn test_new_wallet_is_empty_and_active() {
        let wallet = wallet();

        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(wallet.can_transact());
        assert!(wallet.transactions.is_empty());
        assert_eq!(wallet.created_at, wallet.updated_at);
    }

    #[test]
    fn test_balance_checks() {
        let mut wallet = wallet();
        wallet.balance = Decimal::from(100);

        assert!(wallet.has_sufficient_balance(Decimal::from(100)));
        assert!(!wallet.has_sufficient_balance(Decimal::from(150)));
        assert_eq!(wallet.balance_money(), Money::new(Decimal::from(100), Currency::Ngn));

        wallet.is_active = false;
        assert!(!wallet.can_transact());
    }
}
