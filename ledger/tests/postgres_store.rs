//! PostgreSQL backend tests. Run with a scratch database:
//!
//! `DATABASE_URL=postgres://... cargo test -p payflow-ledger -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use payflow_common::{Currency, LedgerError, Money, Reference, UserId};
use payflow_ledger::store::postgres::PgStoreOptions;
use payflow_ledger::{
    BalanceMutationEngine, LedgerAuditor, LedgerStore, Metadata, PgLedgerStore, Transaction,
    TransactionKind, TransactionStatus, Wallet, WalletProvisioner,
};
use rust_decimal::Decimal;
use uuid::Uuid;

async fn store() -> PgLedgerStore {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgLedgerStore::connect(&PgStoreOptions {
        database_url,
        max_connections: 8,
        acquire_timeout: Duration::from_secs(3),
        lock_timeout: Duration::from_secs(2),
    })
    .await
    .unwrap();
    store.migrate().await.unwrap();
    store
}

async fn wallet(store: &PgLedgerStore) -> Wallet {
    let owner = UserId::new(format!("pg-{}", Uuid::new_v4()));
    WalletProvisioner::new(Arc::new(store.clone()), 10)
        .provision(&owner, Currency::Ngn)
        .await
        .unwrap()
}

async fn apply(
    store: &PgLedgerStore,
    kind: TransactionKind,
    amount: i64,
    reference: Reference,
) -> Result<(), LedgerError> {
    let tx = Transaction::pending(
        kind,
        Money::new(Decimal::from(amount), Currency::Ngn),
        reference,
        "pg test",
        Metadata::new(),
    );
    let mut scope = store.begin().await?;
    BalanceMutationEngine::new().execute(scope.as_mut(), tx).await?;
    scope.commit().await
}

fn unique_reference() -> Reference {
    Reference::parse(&format!("PG-{}", Uuid::new_v4())).unwrap()
}

#[tokio::test]
#[ignore]
async fn test_pg_transfer_and_history() {
    let store = store().await;
    let a = wallet(&store).await;
    let b = wallet(&store).await;

    apply(&store, TransactionKind::Deposit { to: a.id }, 1000, unique_reference())
        .await
        .unwrap();
    apply(
        &store,
        TransactionKind::transfer(a.id, b.id).unwrap(),
        300,
        Reference::transfer(),
    )
    .await
    .unwrap();

    let a_now = store.wallet(a.id).await.unwrap().unwrap();
    let b_now = store.wallet(b.id).await.unwrap().unwrap();
    assert_eq!(a_now.balance, Decimal::from(700));
    assert_eq!(b_now.balance, Decimal::from(300));
    assert_eq!(a_now.transactions.len(), 2);
    assert_eq!(b_now.transactions.len(), 1);

    let transfer = store
        .transaction(b_now.transactions[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transfer.status, TransactionStatus::Completed);

    let audit = LedgerAuditor::new(Arc::new(store.clone()))
        .verify_wallet(a.id)
        .await
        .unwrap();
    assert!(audit.is_balanced());
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_reference_rolls_back() {
    let store = store().await;
    let a = wallet(&store).await;
    let reference = unique_reference();

    apply(&store, TransactionKind::Deposit { to: a.id }, 500, reference.clone())
        .await
        .unwrap();
    let err = apply(&store, TransactionKind::Deposit { to: a.id }, 500, reference.clone())
        .await
        .unwrap_err();

    assert_eq!(err, LedgerError::DuplicateReference(reference.to_string()));
    assert_eq!(
        store.wallet(a.id).await.unwrap().unwrap().balance,
        Decimal::from(500)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_debits_serialize() {
    let store = store().await;
    let a = wallet(&store).await;
    apply(&store, TransactionKind::Deposit { to: a.id }, 599, unique_reference())
        .await
        .unwrap();

    let first = {
        let store = store.clone();
        tokio::spawn(async move {
            apply(&store, TransactionKind::Withdrawal { from: a.id }, 300, Reference::withdrawal()).await
        })
    };
    let second = {
        let store = store.clone();
        tokio::spawn(async move {
            apply(&store, TransactionKind::Withdrawal { from: a.id }, 300, Reference::withdrawal()).await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. }))));
    assert_eq!(
        store.wallet(a.id).await.unwrap().unwrap().balance,
        Decimal::from(299)
    );
}
