//! In-process ledger store.
//!
//! Committed state sits behind a [`parking_lot::RwLock`] that is only held
//! for the duration of a lookup or of applying a commit. Scopes are
//! serialized by a single async writer lock taken in [`LedgerStore::begin`]
//! and stage their writes privately until commit, so readers never observe
//! a partially applied scope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use payflow_common::{
    LedgerError, Reference, Result, TransactionId, UserId, WalletId, WalletNumber,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{
    AtomicScope, BalanceSnapshot, LedgerStore, Pagination, TransactionFilter, WalletFlows,
    WalletInsert,
};
use crate::transaction::{Transaction, TransactionStatus};
use crate::wallet::Wallet;

#[derive(Debug, Default)]
struct MemoryState {
    wallets: HashMap<WalletId, Wallet>,
    by_owner: HashMap<UserId, WalletId>,
    by_number: HashMap<WalletNumber, WalletId>,
    transactions: HashMap<TransactionId, Transaction>,
    by_reference: HashMap<Reference, TransactionId>,
}

impl MemoryState {
    fn wallet_by_owner(&self, owner: &UserId) -> Option<Wallet> {
        self.by_owner
            .get(owner)
            .and_then(|id| self.wallets.get(id))
            .cloned()
    }

    fn wallet_by_number(&self, number: &WalletNumber) -> Option<Wallet> {
        self.by_number
            .get(number)
            .and_then(|id| self.wallets.get(id))
            .cloned()
    }

    fn transaction_by_reference(&self, reference: &Reference) -> Option<Transaction> {
        self.by_reference
            .get(reference)
            .and_then(|id| self.transactions.get(id))
            .cloned()
    }
}

/// Ledger store held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions, in any status.
    pub fn transaction_count(&self) -> usize {
        self.state.read().transactions.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn AtomicScope>> {
        let writer = self.writer.clone().lock_owned().await;
        Ok(Box::new(MemoryScope {
            state: self.state.clone(),
            _writer: writer,
            wallets: HashMap::new(),
            transactions: HashMap::new(),
            references: HashMap::new(),
        }))
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<WalletInsert> {
        let _writer = self.writer.lock().await;
        let mut state = self.state.write();

        if state.by_owner.contains_key(&wallet.owner) {
            return Err(LedgerError::WalletAlreadyExists(wallet.owner.clone()));
        }
        if state.by_number.contains_key(&wallet.wallet_number) {
            return Ok(WalletInsert::NumberTaken);
        }

        state.by_owner.insert(wallet.owner.clone(), wallet.id);
        state.by_number.insert(wallet.wallet_number.clone(), wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(WalletInsert::Inserted)
    }

    async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<Wallet> {
        let _writer = self.writer.lock().await;
        let mut state = self.state.write();

        let wallet = state
            .wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))?;
        wallet.is_active = active;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.state.read().wallets.get(&id).cloned())
    }

    async fn wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>> {
        Ok(self.state.read().wallet_by_owner(owner))
    }

    async fn wallet_by_number(&self, number: &WalletNumber) -> Result<Option<Wallet>> {
        Ok(self.state.read().wallet_by_number(number))
    }

    async fn wallet_number_exists(&self, number: &WalletNumber) -> Result<bool> {
        Ok(self.state.read().by_number.contains_key(number))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.state.read().transactions.get(&id).cloned())
    }

    async fn transaction_by_reference(
        &self,
        reference: &Reference,
    ) -> Result<Option<Transaction>> {
        Ok(self.state.read().transaction_by_reference(reference))
    }

    async fn list_transactions(
        &self,
        wallet: WalletId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, u64)> {
        let mut matching: Vec<Transaction> = self
            .state
            .read()
            .transactions
            .values()
            .filter(|tx| tx.kind.involves(wallet) && filter.matches(tx))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok((items, total))
    }

    async fn balance_snapshots(&self, wallet: Option<WalletId>) -> Result<Vec<BalanceSnapshot>> {
        let state = self.state.read();

        let mut flows: HashMap<WalletId, WalletFlows> = HashMap::new();
        for tx in state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Completed)
        {
            if let Some(to) = tx.kind.to_wallet() {
                flows.entry(to).or_default().credits += tx.amount;
            }
            if let Some(from) = tx.kind.from_wallet() {
                flows.entry(from).or_default().debits += tx.amount;
            }
        }

        let mut wallets: Vec<&Wallet> = state
            .wallets
            .values()
            .filter(|w| wallet.map_or(true, |id| w.id == id))
            .collect();
        wallets.sort_by_key(|w| (w.created_at, w.id));

        Ok(wallets
            .into_iter()
            .map(|w| BalanceSnapshot {
                wallet_id: w.id,
                balance: w.balance,
                flows: flows.get(&w.id).copied().unwrap_or_default(),
            })
            .collect())
    }
}

/// Scope over a [`MemoryLedgerStore`]. Holds the writer lock for its lifetime.
pub struct MemoryScope {
    state: Arc<RwLock<MemoryState>>,
    _writer: OwnedMutexGuard<()>,
    wallets: HashMap<WalletId, Wallet>,
    transactions: HashMap<TransactionId, Transaction>,
    references: HashMap<Reference, TransactionId>,
}

impl MemoryScope {
    fn current_wallet(&self, id: WalletId) -> Option<Wallet> {
        self.wallets
            .get(&id)
            .cloned()
            .or_else(|| self.state.read().wallets.get(&id).cloned())
    }

    fn staged_wallet_mut(&mut self, id: WalletId) -> Result<&mut Wallet> {
        if !self.wallets.contains_key(&id) {
            let wallet = self
                .state
                .read()
                .wallets
                .get(&id)
                .cloned()
                .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))?;
            self.wallets.insert(id, wallet);
        }
        self.wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))
    }
}

#[async_trait]
impl AtomicScope for MemoryScope {
    async fn wallet_by_owner(&mut self, owner: &UserId) -> Result<Option<Wallet>> {
        let id = self.state.read().by_owner.get(owner).copied();
        Ok(id.and_then(|id| self.current_wallet(id)))
    }

    async fn wallet_by_number(&mut self, number: &WalletNumber) -> Result<Option<Wallet>> {
        let id = self.state.read().by_number.get(number).copied();
        Ok(id.and_then(|id| self.current_wallet(id)))
    }

    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        // The writer lock already excludes every other scope.
        Ok(self.current_wallet(id))
    }

    async fn reference_exists(&mut self, reference: &Reference) -> Result<bool> {
        Ok(self.references.contains_key(reference)
            || self.state.read().by_reference.contains_key(reference))
    }

    async fn update_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        if balance < Decimal::ZERO {
            return Err(LedgerError::Internal(format!(
                "Refusing negative balance {balance} for wallet {id}"
            )));
        }
        let wallet = self.staged_wallet_mut(id)?;
        wallet.balance = balance;
        wallet.updated_at = updated_at;
        Ok(())
    }

    async fn append_wallet_transaction(&mut self, id: WalletId, tx: TransactionId) -> Result<()> {
        self.staged_wallet_mut(id)?.transactions.push(tx);
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        if self.reference_exists(&tx.reference).await? {
            return Err(LedgerError::DuplicateReference(tx.reference.to_string()));
        }
        self.references.insert(tx.reference.clone(), tx.id);
        self.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.transactions.contains_key(&id) {
            let committed = self
                .state
                .read()
                .transactions
                .get(&id)
                .cloned()
                .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
            self.transactions.insert(id, committed);
        }
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.status = status;
            tx.updated_at = updated_at;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryScope {
            state,
            _writer,
            wallets,
            transactions,
            references,
        } = *self;

        let mut state = state.write();
        let (wallet_count, tx_count) = (wallets.len(), transactions.len());
        state.wallets.extend(wallets);
        state.transactions.extend(transactions);
        state.by_reference.extend(references);
        drop(state);

        debug!(wallets = wallet_count, transactions = tx_count, "Memory scope committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(
            wallets = self.wallets.len(),
            transactions = self.transactions.len(),
            "Memory scope rolled back"
        );
        Ok(())
    }
}
