//! Read side of the ledger.
//!
//! Queries go straight to the store and take no scope locks.

use std::sync::Arc;

use payflow_common::{LedgerError, Reference, Result, UserId, WalletNumber};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::balance::BalanceView;
use crate::store::{LedgerStore, Pagination, TransactionFilter};
use crate::transaction::{Transaction, TransactionSummary};
use crate::wallet::Wallet;

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Paging bounds applied to history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLimits {
    /// Limit used when the caller gives none.
    pub default_limit: u32,
    /// Requested limits are clamped to this.
    pub max_limit: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

/// Caller-supplied page request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page; defaults to 1.
    pub page: Option<u32>,
    /// Page size; defaults to the configured default.
    pub limit: Option<u32>,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Resolve against `limits`.
    pub fn resolve(&self, limits: QueryLimits) -> Result<Pagination> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(LedgerError::invalid_field("page", "Page must be at least 1"));
        }

        let limit = self.limit.unwrap_or(limits.default_limit);
        if limit == 0 {
            return Err(LedgerError::invalid_field("limit", "Limit must be at least 1"));
        }

        Ok(Pagination {
            page,
            limit: limit.min(limits.max_limit),
        })
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching items across all pages.
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    fn new(items: Vec<T>, total: u64, page: Pagination) -> Self {
        let limit = u64::from(page.limit.max(1));
        Self {
            items,
            total,
            total_pages: total.div_ceil(limit),
            current_page: page.page,
            limit: page.limit,
        }
    }

    /// Number of items on this page.
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// Wallet and history lookups.
#[derive(Clone)]
pub struct LedgerQuery {
    store: Arc<dyn LedgerStore>,
    limits: QueryLimits,
}

impl LedgerQuery {
    pub fn new(store: Arc<dyn LedgerStore>, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// Wallet owned by `owner`.
    pub async fn wallet_by_owner(&self, owner: &UserId) -> Result<Wallet> {
        self.store
            .wallet_by_owner(owner)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("owner {owner}")))
    }

    /// Wallet addressed by `number`.
    pub async fn wallet_by_number(&self, number: &WalletNumber) -> Result<Wallet> {
        self.store
            .wallet_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("number {number}")))
    }

    /// Resolve a transfer recipient. `caller`'s own wallet is refused.
    pub async fn find_recipient(&self, caller: &UserId, number: &WalletNumber) -> Result<Wallet> {
        let wallet = self.wallet_by_number(number).await?;
        if wallet.is_owned_by(caller) {
            return Err(LedgerError::SelfTransferRejected);
        }
        Ok(wallet)
    }

    /// Current balance of `owner`'s wallet.
    pub async fn balance(&self, owner: &UserId) -> Result<BalanceView> {
        let wallet = self.wallet_by_owner(owner).await?;
        Ok(BalanceView::from(&wallet))
    }

    /// History of `owner`'s wallet, newest first.
    pub async fn list_transactions(
        &self,
        owner: &UserId,
        filter: &TransactionFilter,
        request: PageRequest,
    ) -> Result<Page<TransactionSummary>> {
        let page = request.resolve(self.limits)?;
        let wallet = self.wallet_by_owner(owner).await?;

        let (transactions, total) = self
            .store
            .list_transactions(wallet.id, filter, page)
            .await?;

        debug!(
            wallet_id = %wallet.id,
            page = page.page,
            returned = transactions.len(),
            total,
            "Listed transactions"
        );

        let items = transactions
            .iter()
            .map(|tx| tx.summary_for(wallet.id))
            .collect();
        Ok(Page::new(items, total, page))
    }

    pub async fn transaction_by_reference(&self, reference: &Reference) -> Result<Transaction> {
        self.store
            .transaction_by_reference(reference)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(reference.to_string()))
    }
}
