//! Ledger entity store.
//!
//! A backend persists wallets and transactions and hands out [`AtomicScope`]s:
//! units of work over several records that either commit together or leave
//! no trace. Dropping a scope without calling [`AtomicScope::commit`] aborts
//! it, so a cancelled or timed-out operation never leaks partial writes.
//!
//! Required isolation: two scopes that mutate the same wallet serialize, the
//! later one observing the earlier one's committed balance. Reads issued
//! through [`LedgerStore`] outside a scope see only committed state and never
//! wait on an open scope longer than the backend's own commit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payflow_common::{
    DateRange, Reference, Result, TransactionId, UserId, WalletId, WalletNumber,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::wallet::Wallet;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Outcome of inserting a freshly provisioned wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletInsert {
    /// Wallet stored.
    Inserted,
    /// Another wallet already holds the number; nothing stored.
    NumberTaken,
}

/// History filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Inclusive creation-time window.
    pub date_range: DateRange,
    /// Only this type.
    pub transaction_type: Option<TransactionType>,
}

impl TransactionFilter {
    /// Check whether `tx` passes the filter.
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.date_range.contains(tx.created_at)
            && self
                .transaction_type
                .map_or(true, |t| tx.transaction_type() == t)
    }
}

/// Resolved page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub limit: u32,
}

impl Pagination {
    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Completed money flow through one wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletFlows {
    /// Sum of COMPLETED transactions crediting the wallet.
    pub credits: Decimal,
    /// Sum of COMPLETED transactions debiting the wallet.
    pub debits: Decimal,
}

impl WalletFlows {
    /// Balance implied by the history.
    pub fn net(&self) -> Decimal {
        self.credits - self.debits
    }
}

/// A wallet's stored balance and its completed flows, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub flows: WalletFlows,
}

/// Persistent wallet and transaction storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic scope.
    async fn begin(&self) -> Result<Box<dyn AtomicScope>>;

    /// Store a new wallet. Fails with `WalletAlreadyExists` if the owner has one.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<WalletInsert>;

    /// Activate or deactivate a wallet.
    async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<Wallet>;

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>>;

    async fn wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>>;

    async fn wallet_by_number(&self, number: &WalletNumber) -> Result<Option<Wallet>>;

    async fn wallet_number_exists(&self, number: &WalletNumber) -> Result<bool>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    async fn transaction_by_reference(&self, reference: &Reference)
        -> Result<Option<Transaction>>;

    /// Transactions on either side of `wallet`, newest first, plus the total
    /// number matching `filter`.
    async fn list_transactions(
        &self,
        wallet: WalletId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, u64)>;

    /// Stored balance and completed flows of `wallet`, or of every wallet
    /// (oldest first) when `None`. Balances and flows come from one
    /// consistent read, so a scope committing meanwhile is seen entirely or
    /// not at all.
    async fn balance_snapshots(&self, wallet: Option<WalletId>) -> Result<Vec<BalanceSnapshot>>;
}

/// A unit of work over several records with all-or-nothing effect.
#[async_trait]
pub trait AtomicScope: Send {
    /// Snapshot read by owner; takes no lock.
    async fn wallet_by_owner(&mut self, owner: &UserId) -> Result<Option<Wallet>>;

    /// Snapshot read by wallet number; takes no lock.
    async fn wallet_by_number(&mut self, number: &WalletNumber) -> Result<Option<Wallet>>;

    /// Read the latest committed wallet and hold it against concurrent
    /// mutation until the scope ends.
    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>>;

    async fn reference_exists(&mut self, reference: &Reference) -> Result<bool>;

    /// Overwrite a locked wallet's balance.
    async fn update_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append `tx` to the wallet's transaction list.
    async fn append_wallet_transaction(&mut self, id: WalletId, tx: TransactionId) -> Result<()>;

    /// Fails with `DuplicateReference` if the reference is taken.
    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()>;

    async fn update_transaction_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Make every write visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
