//! Balance mutation engine.
//!
//! Applies a transaction's legs to wallet balances inside a caller-owned
//! [`AtomicScope`]. The engine never commits: on `Err` the caller drops or
//! rolls back the scope and nothing it wrote survives.

use std::collections::HashMap;

use payflow_common::{Currency, LedgerError, Money, Reference, Result, WalletId};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::balance::BalanceChange;
use crate::store::AtomicScope;
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// The transaction, now COMPLETED.
    pub transaction: Transaction,
    /// One change per leg, debits first.
    pub changes: Vec<BalanceChange>,
}

impl MutationOutcome {
    /// Change applied to `wallet`, if it was a leg.
    pub fn change_for(&self, wallet: WalletId) -> Option<&BalanceChange> {
        self.changes.iter().find(|c| c.wallet_id == wallet)
    }
}

/// Applies balance deltas and records the transaction that caused them.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceMutationEngine;

impl BalanceMutationEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self
    }

    /// Record `transaction` and apply its legs within `scope`.
    ///
    /// The transaction must be PENDING. It is inserted as PENDING, every leg
    /// is applied against the wallet balance re-read under lock, and only then
    /// is it flipped to COMPLETED. Wallets are locked in ascending id order so
    /// two scopes touching the same pair cannot deadlock.
    #[instrument(
        skip(self, scope, transaction),
        fields(reference = %transaction.reference, kind = %transaction.transaction_type())
    )]
    pub async fn execute(
        &self,
        scope: &mut dyn AtomicScope,
        mut transaction: Transaction,
    ) -> Result<MutationOutcome> {
        if transaction.status != TransactionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                from: transaction.status.to_string(),
                to: TransactionStatus::Completed.to_string(),
            });
        }
        Money::checked_amount(transaction.amount, transaction.currency)?;

        if scope.reference_exists(&transaction.reference).await? {
            warn!("Reference already recorded");
            return Err(LedgerError::DuplicateReference(
                transaction.reference.to_string(),
            ));
        }

        let legs = transaction.legs();
        let mut wallets = Self::lock_wallets(scope, &legs).await?;

        scope.insert_transaction(&transaction).await?;

        let mut changes = Vec::with_capacity(legs.len());
        for &(wallet_id, delta) in &legs {
            let wallet = wallets
                .get_mut(&wallet_id)
                .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))?;
            let change = Self::apply_delta(
                scope,
                wallet,
                delta,
                transaction.currency,
                &transaction.reference,
            )
            .await?;
            changes.push(change);
        }

        for &(wallet_id, _) in &legs {
            scope
                .append_wallet_transaction(wallet_id, transaction.id)
                .await?;
        }

        transaction.transition_to(TransactionStatus::Completed)?;
        scope
            .update_transaction_status(transaction.id, transaction.status, transaction.updated_at)
            .await?;

        info!(
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            legs = changes.len(),
            "Mutation applied"
        );

        Ok(MutationOutcome {
            transaction,
            changes,
        })
    }

    async fn lock_wallets(
        scope: &mut dyn AtomicScope,
        legs: &[(WalletId, Decimal)],
    ) -> Result<HashMap<WalletId, Wallet>> {
        let mut order: Vec<WalletId> = legs.iter().map(|(id, _)| *id).collect();
        order.sort();
        order.dedup();

        let mut wallets = HashMap::with_capacity(order.len());
        for id in order {
            let wallet = scope
                .lock_wallet(id)
                .await?
                .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))?;
            wallets.insert(id, wallet);
        }
        Ok(wallets)
    }

    /// Apply one signed delta to a locked wallet.
    async fn apply_delta(
        scope: &mut dyn AtomicScope,
        wallet: &mut Wallet,
        delta: Decimal,
        currency: Currency,
        reference: &Reference,
    ) -> Result<BalanceChange> {
        if !wallet.can_transact() {
            return Err(LedgerError::WalletInactive(wallet.id));
        }
        if wallet.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: wallet.currency,
                actual: currency,
            });
        }

        let required = delta.abs();
        if delta.is_sign_negative() && !wallet.has_sufficient_balance(required) {
            warn!(
                wallet_id = %wallet.id,
                required = %required,
                available = %wallet.balance,
                "Insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                required,
                available: wallet.balance,
            });
        }

        let change =
            BalanceChange::from_delta(wallet.id, wallet.balance_money(), delta, reference.clone())?;
        scope
            .update_balance(wallet.id, change.balance_after, change.timestamp)
            .await?;

        wallet.balance = change.balance_after;
        wallet.updated_at = change.timestamp;

        debug!(
            wallet_id = %wallet.id,
            before = %change.balance_before,
            after = %change.balance_after,
            "Balance updated"
        );

        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LedgerStore, MemoryLedgerStore};
    use crate::transaction::{Metadata, TransactionKind};
    use payflow_common::{UserId, WalletNumber};

    async fn seeded(store: &MemoryLedgerStore, owner: &str, number: &str, balance: i64) -> Wallet {
        let mut wallet = Wallet::new(
            UserId::new(owner),
            WalletNumber::parse(number).unwrap(),
            Currency::Ngn,
        );
        wallet.balance = Decimal::from(balance);
        store.insert_wallet(&wallet).await.unwrap();
        wallet
    }

    fn pending(kind: TransactionKind, amount: i64, reference: Reference) -> Transaction {
        Transaction::pending(
            kind,
            Money::new(Decimal::from(amount), Currency::Ngn),
            reference,
            "test",
            Metadata::new(),
        )
    }

    async fn balance(store: &MemoryLedgerStore, id: WalletId) -> Decimal {
        store.wallet(id).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 1000).await;
        let b = seeded(&store, "bob", "1000000002", 500).await;
        let engine = BalanceMutationEngine::new();

        let tx = pending(
            TransactionKind::transfer(a.id, b.id).unwrap(),
            300,
            Reference::transfer(),
        );
        let mut scope = store.begin().await.unwrap();
        let outcome = engine.execute(scope.as_mut(), tx).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(
            outcome.change_for(a.id).unwrap().balance_after,
            Decimal::from(700)
        );
        assert_eq!(balance(&store, a.id).await, Decimal::from(700));
        assert_eq!(balance(&store, b.id).await, Decimal::from(800));

        let stored = store
            .transaction(outcome.transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        let sender = store.wallet(a.id).await.unwrap().unwrap();
        assert_eq!(sender.transactions, vec![stored.id]);
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejected() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 100).await;
        let engine = BalanceMutationEngine::new();

        let tx = pending(
            TransactionKind::Withdrawal { from: a.id },
            150,
            Reference::withdrawal(),
        );
        let mut scope = store.begin().await.unwrap();
        let err = engine.execute(scope.as_mut(), tx).await.unwrap_err();
        drop(scope);

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                required: Decimal::from(150),
                available: Decimal::from(100),
            }
        );
        assert_eq!(balance(&store, a.id).await, Decimal::from(100));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credit_wallet_leaves_no_trace() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 1000).await;
        let engine = BalanceMutationEngine::new();

        let tx = pending(
            TransactionKind::transfer(a.id, WalletId::new()).unwrap(),
            100,
            Reference::transfer(),
        );
        let mut scope = store.begin().await.unwrap();
        let err = engine.execute(scope.as_mut(), tx).await.unwrap_err();
        scope.rollback().await.unwrap();

        assert!(matches!(err, LedgerError::WalletNotFound(_)));
        assert_eq!(balance(&store, a.id).await, Decimal::from(1000));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 0).await;
        let engine = BalanceMutationEngine::new();
        let reference = Reference::parse("TXN-1").unwrap();

        let mut scope = store.begin().await.unwrap();
        engine
            .execute(
                scope.as_mut(),
                pending(TransactionKind::Deposit { to: a.id }, 500, reference.clone()),
            )
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = store.begin().await.unwrap();
        let err = engine
            .execute(
                scope.as_mut(),
                pending(TransactionKind::Deposit { to: a.id }, 500, reference),
            )
            .await
            .unwrap_err();
        drop(scope);

        assert_eq!(err, LedgerError::DuplicateReference("TXN-1".to_string()));
        assert_eq!(balance(&store, a.id).await, Decimal::from(500));
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_inactive_wallet_rejected() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 0).await;
        store.set_wallet_active(a.id, false).await.unwrap();
        let engine = BalanceMutationEngine::new();

        let mut scope = store.begin().await.unwrap();
        let err = engine
            .execute(
                scope.as_mut(),
                pending(TransactionKind::Deposit { to: a.id }, 10, Reference::withdrawal()),
            )
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::WalletInactive(a.id));
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 0).await;
        let engine = BalanceMutationEngine::new();

        let mut tx = pending(TransactionKind::Deposit { to: a.id }, 1, Reference::withdrawal());
        tx.amount = Decimal::new(1001, 3);

        let mut scope = store.begin().await.unwrap();
        let err = engine.execute(scope.as_mut(), tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn test_non_pending_transaction_rejected() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 0).await;
        let engine = BalanceMutationEngine::new();

        let mut tx = pending(TransactionKind::Deposit { to: a.id }, 10, Reference::withdrawal());
        tx.transition_to(TransactionStatus::Failed).unwrap();

        let mut scope = store.begin().await.unwrap();
        let err = engine.execute(scope.as_mut(), tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_credit_reaching_limit_leaves_no_trace() {
        let store = MemoryLedgerStore::new();
        let a = seeded(&store, "alice", "1000000001", 999_999_999_999_999_999).await;
        let engine = BalanceMutationEngine::new();

        let tx = pending(TransactionKind::Deposit { to: a.id }, 1, Reference::withdrawal());
        let mut scope = store.begin().await.unwrap();
        let err = engine.execute(scope.as_mut(), tx).await.unwrap_err();
        drop(scope);

        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
        assert_eq!(balance(&store, a.id).await, Money::limit() - Decimal::ONE);
        assert_eq!(store.transaction_count(), 0);
    }
}
