//! Ledger consistency checks.
//!
//! A wallet is balanced when its stored balance equals the sum of its
//! COMPLETED credits minus its COMPLETED debits. Balances and sums are read
//! from one store snapshot, so audits may run against a live ledger.

use std::sync::Arc;

use payflow_common::{LedgerError, Result, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::store::{BalanceSnapshot, LedgerStore};

/// Audit result for one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAudit {
    pub wallet_id: WalletId,
    /// Balance as stored.
    pub recorded: Decimal,
    /// Balance implied by the transaction history.
    pub derived: Decimal,
}

impl From<&BalanceSnapshot> for WalletAudit {
    fn from(snapshot: &BalanceSnapshot) -> Self {
        Self {
            wallet_id: snapshot.wallet_id,
            recorded: snapshot.balance,
            derived: snapshot.flows.net(),
        }
    }
}

impl WalletAudit {
    pub fn is_balanced(&self) -> bool {
        self.recorded == self.derived && !self.recorded.is_sign_negative()
    }

    /// Recorded minus derived.
    pub fn discrepancy(&self) -> Decimal {
        self.recorded - self.derived
    }
}

/// Audit result for the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub imbalanced: Vec<WalletAudit>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.imbalanced.is_empty()
    }
}

/// Recomputes balances from history.
pub struct LedgerAuditor {
    store: Arc<dyn LedgerStore>,
}

impl LedgerAuditor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Audit one wallet.
    pub async fn verify_wallet(&self, id: WalletId) -> Result<WalletAudit> {
        self.store
            .balance_snapshots(Some(id))
            .await?
            .first()
            .map(WalletAudit::from)
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))
    }

    /// Audit every wallet.
    pub async fn verify_all(&self) -> Result<AuditReport> {
        let snapshots = self.store.balance_snapshots(None).await?;
        let mut report = AuditReport {
            wallets_checked: snapshots.len(),
            imbalanced: Vec::new(),
        };

        for audit in snapshots.iter().map(WalletAudit::from) {
            if !audit.is_balanced() {
                error!(
                    wallet_id = %audit.wallet_id,
                    recorded = %audit.recorded,
                    derived = %audit.derived,
                    discrepancy = %audit.discrepancy(),
                    "Wallet balance does not match history"
                );
                report.imbalanced.push(audit);
            }
        }

        info!(
            wallets = report.wallets_checked,
            imbalanced = report.imbalanced.len(),
            "Ledger audit finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BalanceMutationEngine;
    use crate::store::MemoryLedgerStore;
    use crate::transaction::{Metadata, Transaction, TransactionKind};
    use crate::wallet::Wallet;
    use payflow_common::{Currency, Money, Reference, UserId, WalletNumber};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Deposit { to: usize, cents: i64 },
        Withdraw { from: usize, cents: i64 },
        Transfer { from: usize, to: usize, cents: i64 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 1..50_000i64).prop_map(|(to, cents)| Op::Deposit { to, cents }),
            (0..3usize, 1..50_000i64).prop_map(|(from, cents)| Op::Withdraw { from, cents }),
            (0..3usize, 0..3usize, 1..50_000i64)
                .prop_map(|(from, to, cents)| Op::Transfer { from, to, cents }),
        ]
    }

    async fn wallets(store: &MemoryLedgerStore) -> Vec<Wallet> {
        let mut out = Vec::new();
        for (i, number) in ["1000000001", "1000000002", "1000000003"].iter().enumerate() {
            let wallet = Wallet::new(
                UserId::new(format!("user-{i}")),
                WalletNumber::parse(number).unwrap(),
                Currency::Ngn,
            );
            store.insert_wallet(&wallet).await.unwrap();
            out.push(wallet);
        }
        out
    }

    async fn run(store: &MemoryLedgerStore, ids: &[WalletId], op: &Op) {
        let (kind, cents) = match *op {
            Op::Deposit { to, cents } => (TransactionKind::Deposit { to: ids[to] }, cents),
            Op::Withdraw { from, cents } => (TransactionKind::Withdrawal { from: ids[from] }, cents),
            Op::Transfer { from, to, cents } => match TransactionKind::transfer(ids[from], ids[to]) {
                Ok(kind) => (kind, cents),
                Err(_) => return,
            },
        };
        let tx = Transaction::pending(
            kind,
            Money::new(Decimal::new(cents, 2), Currency::Ngn),
            Reference::transfer(),
            "prop",
            Metadata::new(),
        );

        let mut scope = store.begin().await.unwrap();
        match BalanceMutationEngine::new().execute(scope.as_mut(), tx).await {
            Ok(_) => scope.commit().await.unwrap(),
            Err(LedgerError::InsufficientFunds { .. }) => scope.rollback().await.unwrap(),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_clean_ledger_audits_clean() {
        let store = MemoryLedgerStore::new();
        let ws = wallets(&store).await;
        let ids: Vec<WalletId> = ws.iter().map(|w| w.id).collect();
        run(&store, &ids, &Op::Deposit { to: 0, cents: 10_000 }).await;
        run(&store, &ids, &Op::Transfer { from: 0, to: 1, cents: 2_500 }).await;

        let auditor = LedgerAuditor::new(Arc::new(store));
        let audit = auditor.verify_wallet(ids[0]).await.unwrap();
        assert_eq!(audit.recorded, Decimal::new(7_500, 2));
        assert!(audit.is_balanced());

        let report = auditor.verify_all().await.unwrap();
        assert_eq!(report.wallets_checked, 3);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_tampered_balance_detected() {
        let store = MemoryLedgerStore::new();
        let ws = wallets(&store).await;
        let ids: Vec<WalletId> = ws.iter().map(|w| w.id).collect();
        run(&store, &ids, &Op::Deposit { to: 0, cents: 10_000 }).await;

        let mut scope = store.begin().await.unwrap();
        scope
            .update_balance(ids[0], Decimal::new(999, 0), chrono::Utc::now())
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let report = LedgerAuditor::new(Arc::new(store)).verify_all().await.unwrap();
        assert_eq!(report.imbalanced.len(), 1);
        assert_eq!(report.imbalanced[0].wallet_id, ids[0]);
        assert_eq!(report.imbalanced[0].discrepancy(), Decimal::new(899, 0));
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let auditor = LedgerAuditor::new(Arc::new(MemoryLedgerStore::new()));
        assert!(matches!(
            auditor.verify_wallet(WalletId::new()).await,
            Err(LedgerError::WalletNotFound(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_balances_stay_non_negative_and_audit_clean(ops in proptest::collection::vec(op(), 1..40)) {
            let (balances, report) = tokio_test::block_on(async {
                let store = MemoryLedgerStore::new();
                let ids: Vec<WalletId> = wallets(&store).await.iter().map(|w| w.id).collect();
                for op in &ops {
                    run(&store, &ids, op).await;
                }

                let mut balances = Vec::new();
                for id in &ids {
                    balances.push(store.wallet(*id).await.unwrap().unwrap().balance);
                }
                let report = LedgerAuditor::new(Arc::new(store)).verify_all().await.unwrap();
                (balances, report)
            });

            for balance in balances {
                prop_assert!(balance >= Decimal::ZERO);
            }
            prop_assert!(report.is_clean());
        }
    }
}
