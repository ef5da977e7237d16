//! Metrics collection for ledger operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use payflow_common::{ErrorKind, LedgerError};

/// Ledger service metrics.
pub struct Metrics {
    /// Operations started.
    pub operations_total: AtomicU64,
    /// Operations committed.
    pub operations_success: AtomicU64,
    /// Operations refused for business reasons.
    pub operations_rejected: AtomicU64,
    /// Operations that failed on storage or internal errors.
    pub operations_failed: AtomicU64,
    /// Operations in flight.
    pub operations_active: AtomicU64,
    /// Rejections for a reused reference.
    pub duplicate_references: AtomicU64,
    /// Rejections for a short balance.
    pub insufficient_funds: AtomicU64,
    /// Scopes aborted by their deadline.
    pub scope_timeouts: AtomicU64,
    /// Wallets created.
    pub wallets_provisioned: AtomicU64,
    /// Notifications delivered.
    pub notifications_sent: AtomicU64,
    /// Notifications that failed or timed out.
    pub notifications_failed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            operations_total: AtomicU64::new(0),
            operations_success: AtomicU64::new(0),
            operations_rejected: AtomicU64::new(0),
            operations_failed: AtomicU64::new(0),
            operations_active: AtomicU64::new(0),
            duplicate_references: AtomicU64::new(0),
            insufficient_funds: AtomicU64::new(0),
            scope_timeouts: AtomicU64::new(0),
            wallets_provisioned: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    /// Record an operation starting. It counts as active until the returned
    /// guard drops, whether or not an outcome was recorded.
    #[must_use = "the operation stops counting as active when the guard drops"]
    pub fn operation_started(&self) -> InFlight<'_> {
        self.operations_total.fetch_add(1, Ordering::Relaxed);
        self.operations_active.fetch_add(1, Ordering::Relaxed);
        InFlight { metrics: self }
    }

    /// Record an operation committing.
    pub fn operation_succeeded(&self) {
        self.operations_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation ending in `error`.
    pub fn operation_errored(&self, error: &LedgerError) {
        match error.kind() {
            ErrorKind::StorageConflict | ErrorKind::Internal => {
                self.operations_failed.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::DuplicateReference => {
                self.duplicate_references.fetch_add(1, Ordering::Relaxed);
                self.operations_rejected.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::InsufficientFunds => {
                self.insufficient_funds.fetch_add(1, Ordering::Relaxed);
                self.operations_rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.operations_rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        if matches!(error, LedgerError::Timeout(_)) {
            self.scope_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn wallet_provisioned(&self) {
        self.wallets_provisioned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            operations_success: self.operations_success.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_active: self.operations_active.load(Ordering::Relaxed),
            duplicate_references: self.duplicate_references.load(Ordering::Relaxed),
            insufficient_funds: self.insufficient_funds.load(Ordering::Relaxed),
            scope_timeouts: self.scope_timeouts.load(Ordering::Relaxed),
            wallets_provisioned: self.wallets_provisioned.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// An operation counted in `operations_active`.
pub struct InFlight<'a> {
    metrics: &'a Metrics,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.operations_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub operations_total: u64,
    pub operations_success: u64,
    pub operations_rejected: u64,
    pub operations_failed: u64,
    pub operations_active: u64,
    pub duplicate_references: u64,
    pub insufficient_funds: u64,
    pub scope_timeouts: u64,
    pub wallets_provisioned: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
