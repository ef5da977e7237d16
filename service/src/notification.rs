//! Post-commit notifications.
//!
//! Events are handed to a [`Notifier`] on a spawned task once the ledger
//! change has committed. Delivery is bounded by a timeout and its outcome
//! never reaches the caller of the ledger operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use payflow_common::{Currency, Reference, UserId, WalletNumber};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::SharedMetrics;

/// A committed ledger change worth telling someone about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    TransferCompleted {
        sender: UserId,
        recipient: UserId,
        sender_name: String,
        amount: Decimal,
        currency: Currency,
        reference: Reference,
    },
    DepositCompleted {
        owner: UserId,
        amount: Decimal,
        currency: Currency,
        reference: Reference,
    },
    WithdrawalCompleted {
        owner: UserId,
        amount: Decimal,
        currency: Currency,
        reference: Reference,
    },
    WalletProvisioned {
        owner: UserId,
        wallet_number: WalletNumber,
        currency: Currency,
    },
}

impl LedgerEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::TransferCompleted { .. } => "transfer_completed",
            LedgerEvent::DepositCompleted { .. } => "deposit_completed",
            LedgerEvent::WithdrawalCompleted { .. } => "withdrawal_completed",
            LedgerEvent::WalletProvisioned { .. } => "wallet_provisioned",
        }
    }

    /// Users who should hear about this event.
    pub fn recipients(&self) -> Vec<&UserId> {
        match self {
            LedgerEvent::TransferCompleted {
                sender, recipient, ..
            } => vec![sender, recipient],
            LedgerEvent::DepositCompleted { owner, .. }
            | LedgerEvent::WithdrawalCompleted { owner, .. }
            | LedgerEvent::WalletProvisioned { owner, .. } => vec![owner],
        }
    }
}

/// Notification delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers ledger events to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError> {
        info!(
            event = event.name(),
            recipients = event.recipients().len(),
            "Ledger notification"
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch onto the runtime.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    metrics: SharedMetrics,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration, metrics: SharedMetrics) -> Self {
        Self {
            notifier,
            timeout,
            metrics,
        }
    }

    /// Spawn delivery of `event`. Failures are logged and counted, never
    /// returned. The handle is only useful to tests; callers drop it.
    pub fn dispatch(&self, event: LedgerEvent) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, notifier.notify(&event)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(timeout)),
            };

            match outcome {
                Ok(()) => {
                    metrics.notification_sent();
                    debug!(event = event.name(), "Notification delivered");
                }
                Err(e) => {
                    metrics.notification_failed();
                    warn!(event = event.name(), error = %e, "Notification failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _event: &LedgerEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".to_string()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn notify(&self, _event: &LedgerEvent) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn provisioned() -> LedgerEvent {
        LedgerEvent::WalletProvisioned {
            owner: UserId::new("alice"),
            wallet_number: WalletNumber::parse("1234567890").unwrap(),
            currency: Currency::Ngn,
        }
    }

    #[tokio::test]
    async fn test_delivery_counted() {
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            NotificationDispatcher::new(Arc::new(LogNotifier), Duration::from_secs(1), metrics.clone());

        dispatcher.dispatch(provisioned()).await.unwrap();
        assert_eq!(metrics.snapshot().notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            NotificationDispatcher::new(Arc::new(Failing), Duration::from_secs(1), metrics.clone());

        dispatcher.dispatch(provisioned()).await.unwrap();
        assert_eq!(metrics.snapshot().notifications_failed, 1);
    }

    #[tokio::test]
    async fn test_stalled_delivery_times_out() {
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            NotificationDispatcher::new(Arc::new(Stalled), Duration::from_millis(50), metrics.clone());

        dispatcher.dispatch(provisioned()).await.unwrap();
        assert_eq!(metrics.snapshot().notifications_failed, 1);
    }

    #[test]
    fn test_transfer_recipients() {
        let event = LedgerEvent::TransferCompleted {
            sender: UserId::new("alice"),
            recipient: UserId::new("bob"),
            sender_name: "Alice Doe".to_string(),
            amount: Decimal::from(300),
            currency: Currency::Ngn,
            reference: Reference::transfer(),
        };
        assert_eq!(event.recipients().len(), 2);
        assert_eq!(event.name(), "transfer_completed");
    }
}
