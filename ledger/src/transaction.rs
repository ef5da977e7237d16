//! Ledger transaction records and their status state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use payflow_common::{
    Currency, LedgerError, Money, Reference, Result, TransactionId, WalletId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Free-form key/value data attached to a transaction.
pub type Metadata = BTreeMap<String, String>;

/// Transaction type, as persisted and filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
}

impl TransactionType {
    /// Persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Payment => "PAYMENT",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "TRANSFER" => Ok(TransactionType::Transfer),
            "PAYMENT" => Ok(TransactionType::Payment),
            other => Err(LedgerError::invalid_field(
                "type",
                format!("Unknown transaction type: {other}"),
            )),
        }
    }
}

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Recorded inside an open scope, balances not yet applied.
    Pending,
    /// Balances applied.
    Completed,
    /// Abandoned before any balance effect.
    Failed,
    /// Undone by a compensating reversal.
    Reversed,
}

impl TransactionStatus {
    /// Persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => {
                &[TransactionStatus::Completed, TransactionStatus::Failed]
            }
            TransactionStatus::Completed => &[TransactionStatus::Reversed],
            TransactionStatus::Failed => &[],
            TransactionStatus::Reversed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            "REVERSED" => Ok(TransactionStatus::Reversed),
            other => Err(LedgerError::invalid_field(
                "status",
                format!("Unknown transaction status: {other}"),
            )),
        }
    }
}

/// What a transaction does, with exactly the wallet references its type needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// External funds credited to `to`.
    Deposit { to: WalletId },
    /// Funds debited from `from` to an external destination.
    Withdrawal { from: WalletId },
    /// Funds moved between two distinct wallets.
    Transfer { from: WalletId, to: WalletId },
    /// Funds debited from `from` to pay a merchant.
    Payment { from: WalletId },
}

impl TransactionKind {
    /// Build a transfer, rejecting `from == to`.
    pub fn transfer(from: WalletId, to: WalletId) -> Result<Self> {
        if from == to {
            return Err(LedgerError::SelfTransferRejected);
        }
        Ok(TransactionKind::Transfer { from, to })
    }

    /// Rebuild from persisted columns.
    pub fn from_parts(
        transaction_type: TransactionType,
        from: Option<WalletId>,
        to: Option<WalletId>,
    ) -> Result<Self> {
        let missing = |side: &str| {
            LedgerError::Internal(format!(
                "{transaction_type} transaction without {side} wallet"
            ))
        };

        match transaction_type {
            TransactionType::Deposit => Ok(TransactionKind::Deposit {
                to: to.ok_or_else(|| missing("to"))?,
            }),
            TransactionType::Withdrawal => Ok(TransactionKind::Withdrawal {
                from: from.ok_or_else(|| missing("from"))?,
            }),
            TransactionType::Payment => Ok(TransactionKind::Payment {
                from: from.ok_or_else(|| missing("from"))?,
            }),
            TransactionType::Transfer => TransactionKind::transfer(
                from.ok_or_else(|| missing("from"))?,
                to.ok_or_else(|| missing("to"))?,
            ),
        }
    }

    /// Get the transaction type.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionKind::Deposit { .. } => TransactionType::Deposit,
            TransactionKind::Withdrawal { .. } => TransactionType::Withdrawal,
            TransactionKind::Transfer { .. } => TransactionType::Transfer,
            TransactionKind::Payment { .. } => TransactionType::Payment,
        }
    }

    /// Debited wallet, if any.
    pub fn from_wallet(&self) -> Option<WalletId> {
        match *self {
            TransactionKind::Withdrawal { from }
            | TransactionKind::Payment { from }
            | TransactionKind::Transfer { from, .. } => Some(from),
            TransactionKind::Deposit { .. } => None,
        }
    }

    /// Credited wallet, if any.
    pub fn to_wallet(&self) -> Option<WalletId> {
        match *self {
            TransactionKind::Deposit { to } | TransactionKind::Transfer { to, .. } => Some(to),
            TransactionKind::Withdrawal { .. } | TransactionKind::Payment { .. } => None,
        }
    }

    /// Check if `wallet` is on either side.
    pub fn involves(&self, wallet: WalletId) -> bool {
        self.from_wallet() == Some(wallet) || self.to_wallet() == Some(wallet)
    }
}

/// A ledger record of a balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID.
    pub id: TransactionId,
    /// Type and wallet references.
    pub kind: TransactionKind,
    /// Amount, always positive.
    pub amount: Decimal,
    /// Currency.
    pub currency: Currency,
    /// Free text.
    pub description: String,
    /// Unique reference / idempotency key.
    pub reference: Reference,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Opaque key/value bag.
    pub metadata: Metadata,
    /// When this transaction was created.
    pub created_at: DateTime<Utc>,
    /// When this transaction was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a PENDING transaction.
    pub fn pending(
        kind: TransactionKind,
        amount: Money,
        reference: Reference,
        description: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: TransactionId::new(),
            kind,
            amount: amount.value,
            currency: amount.currency,
            description: description.into(),
            reference,
            status: TransactionStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the transaction type.
    pub fn transaction_type(&self) -> TransactionType {
        self.kind.transaction_type()
    }

    /// Amount as money.
    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency)
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Signed balance effect per wallet: debits negative, credits positive.
    /// Debits come first.
    pub fn legs(&self) -> Vec<(WalletId, Decimal)> {
        let mut legs = Vec::with_capacity(2);
        if let Some(from) = self.kind.from_wallet() {
            legs.push((from, -self.amount));
        }
        if let Some(to) = self.kind.to_wallet() {
            legs.push((to, self.amount));
        }
        legs
    }

    /// Check if `wallet` is the debited side.
    pub fn is_outgoing_for(&self, wallet: WalletId) -> bool {
        self.kind.from_wallet() == Some(wallet)
    }

    /// View of this transaction from `wallet`'s perspective.
    pub fn summary_for(&self, wallet: WalletId) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            transaction_type: self.transaction_type(),
            amount: self.amount,
            currency: self.currency,
            reference: self.reference.clone(),
            description: self.description.clone(),
            status: self.status,
            is_outgoing: self.is_outgoing_for(wallet),
            created_at: self.created_at,
        }
    }
}

/// Caller-facing transaction view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference: Reference,
    pub description: String,
    pub status: TransactionStatus,
    /// The viewing wallet is the debited side.
    pub is_outgoing: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(amount: i64) -> (WalletId, WalletId, Transaction) {
        let from = WalletId::new();
        let to = WalletId::new();
        let tx = Transaction::pending(
            TransactionKind::transfer(from, to).unwrap(),
            Money::new(Decimal::from(amount), Currency::Ngn),
            Reference::transfer(),
            "Wallet transfer",
            Metadata::new(),
        );
        (from, to, tx)
    }

    #[test]
    fn test_self_transfer_rejected() {
        let wallet = WalletId::new();
        assert_eq!(
            TransactionKind::transfer(wallet, wallet),
            Err(LedgerError::SelfTransferRejected)
        );
    }

    #[test]
    fn test_transfer_legs_debit_first() {
        let (from, to, tx) = transfer(300);

        assert_eq!(
            tx.legs(),
            vec![(from, Decimal::from(-300)), (to, Decimal::from(300))]
        );
        assert!(tx.is_outgoing_for(from));
        assert!(!tx.is_outgoing_for(to));
        assert!(!tx.summary_for(to).is_outgoing);
    }

    #[test]
    fn test_status_transitions() {
        let (_, _, mut tx) = transfer(10);

        assert!(tx.transition_to(TransactionStatus::Completed).is_ok());
        assert!(tx.transition_to(TransactionStatus::Failed).is_err());
        assert!(tx.transition_to(TransactionStatus::Reversed).is_ok());
        assert!(tx.status.valid_transitions().is_empty());
        assert!(tx.transition_to(TransactionStatus::Completed).is_err());
    }

    #[test]
    fn test_from_parts_requires_sides() {
        let wallet = WalletId::new();

        assert!(TransactionKind::from_parts(TransactionType::Deposit, None, Some(wallet)).is_ok());
        assert!(TransactionKind::from_parts(TransactionType::Deposit, Some(wallet), None).is_err());
        assert!(
            TransactionKind::from_parts(TransactionType::Transfer, Some(wallet), Some(wallet))
                .is_err()
        );
        assert_eq!(
            TransactionKind::from_parts(TransactionType::Payment, Some(wallet), None)
                .unwrap()
                .transaction_type(),
            TransactionType::Payment
        );
    }

    #[test]
    fn test_type_and_status_parse() {
        assert_eq!("deposit".parse::<TransactionType>().unwrap(), TransactionType::Deposit);
        assert!("REFUND".parse::<TransactionType>().is_err());
        assert_eq!(
            "COMPLETED".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Completed
        );
    }
}
