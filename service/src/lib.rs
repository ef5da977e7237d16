//! PayFlow Wallet Service
//!
//! Orchestrates wallet operations over the ledger: transfers, deposits and
//! withdrawals under a bounded atomic scope, wallet provisioning, history
//! queries, audits, and fire-and-forget notifications after commit.

pub mod config;
pub mod identity;
pub mod metrics;
pub mod notification;
pub mod orchestrator;

pub use config::LedgerConfig;
pub use identity::{Actor, Role};
pub use metrics::{InFlight, Metrics, MetricsSnapshot, SharedMetrics};
pub use notification::{LedgerEvent, LogNotifier, NotificationDispatcher, Notifier, NotifyError};
pub use orchestrator::{
    DepositRequest, OperationReceipt, RecipientView, TransferOrchestrator, TransferRequest,
    WalletSnapshot, WithdrawalRequest,
};
