//! Wallet operation orchestration.
//!
//! Every balance-changing operation follows the same shape: cheap validation
//! outside any scope, then one atomic scope that re-reads the wallets,
//! applies the mutation through the engine and commits, all under the
//! configured scope deadline. Notifications go out only after commit.

use std::future::Future;
use std::sync::Arc;

use payflow_common::{
    Currency, LedgerError, Money, Reference, Result, UserId, WalletId, WalletNumber,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use payflow_ledger::{
    AuditReport, BalanceMutationEngine, BalanceView, LedgerAuditor, LedgerQuery, LedgerStore,
    Metadata, MutationOutcome, NumberSource, Page, PageRequest, Transaction, TransactionFilter,
    TransactionKind, TransactionSummary, Wallet, WalletAudit, WalletProvisioner,
};

use crate::config::LedgerConfig;
use crate::identity::Actor;
use crate::metrics::{Metrics, SharedMetrics};
use crate::notification::{LedgerEvent, NotificationDispatcher, Notifier};

const TRANSFER_DESCRIPTION: &str = "Wallet transfer";
const DEPOSIT_DESCRIPTION: &str = "Wallet deposit";
const WITHDRAWAL_DESCRIPTION: &str = "Wallet withdrawal";
const DEFAULT_METHOD: &str = "bank";

/// Transfer to another user's wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub receiver_wallet_number: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Credit from an external source, keyed by the caller's reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub reference: String,
    pub description: Option<String>,
    /// Defaults to `bank`.
    pub payment_method: Option<String>,
    /// Extra caller metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Debit to an external destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub description: Option<String>,
    /// Defaults to `bank`.
    pub withdrawal_method: Option<String>,
}

/// The caller's wallet after an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub id: WalletId,
    pub wallet_number: WalletNumber,
    pub balance: Decimal,
    pub currency: Currency,
}

/// Result of a committed balance-changing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub transaction: TransactionSummary,
    pub wallet: WalletSnapshot,
}

/// What a sender may learn about a transfer recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientView {
    pub wallet_number: WalletNumber,
    pub owner: UserId,
    pub currency: Currency,
}

/// Entry point for every wallet operation.
pub struct TransferOrchestrator {
    config: LedgerConfig,
    store: Arc<dyn LedgerStore>,
    engine: BalanceMutationEngine,
    query: LedgerQuery,
    provisioner: WalletProvisioner,
    auditor: LedgerAuditor,
    notifications: NotificationDispatcher,
    metrics: SharedMetrics,
}

impl TransferOrchestrator {
    /// Create an orchestrator over `store`.
    pub fn new(config: LedgerConfig, store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        let provisioner = WalletProvisioner::new(store.clone(), config.provisioning.max_attempts);
        Self::assemble(config, store, notifier, provisioner)
    }

    /// Create an orchestrator drawing wallet numbers from `numbers`.
    pub fn with_number_source(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        numbers: Arc<dyn NumberSource>,
    ) -> Self {
        let provisioner = WalletProvisioner::with_source(
            store.clone(),
            numbers,
            config.provisioning.max_attempts,
        );
        Self::assemble(config, store, notifier, provisioner)
    }

    fn assemble(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        provisioner: WalletProvisioner,
    ) -> Self {
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let notifications = NotificationDispatcher::new(
            notifier,
            config.execution.notification_timeout,
            metrics.clone(),
        );

        Self {
            query: LedgerQuery::new(store.clone(), config.query.limits()),
            auditor: LedgerAuditor::new(store.clone()),
            engine: BalanceMutationEngine::new(),
            provisioner,
            notifications,
            metrics,
            store,
            config,
        }
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn query(&self) -> &LedgerQuery {
        &self.query
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Move funds from the actor's wallet to the wallet numbered
    /// `receiver_wallet_number`.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn transfer(&self, actor: &Actor, request: TransferRequest) -> Result<OperationReceipt> {
        self.tracked("transfer", async {
            let number = WalletNumber::parse(&request.receiver_wallet_number)?;
            let sender = self.query.wallet_by_owner(&actor.user_id).await?;
            if sender.wallet_number == number {
                return Err(LedgerError::SelfTransferRejected);
            }
            let amount = Money::checked_amount(request.amount, sender.currency)?;

            let description = description_or(request.description, TRANSFER_DESCRIPTION);
            let mut metadata = Metadata::new();
            metadata.insert("senderName".to_string(), actor.display_name.clone());
            metadata.insert("receiverWalletNumber".to_string(), number.to_string());

            let (outcome, sender, receiver) = self
                .bounded("transfer", self.transfer_scope(actor, &number, amount, description, metadata))
                .await?;

            info!(
                reference = %outcome.transaction.reference,
                from = %sender.id,
                to = %receiver.id,
                amount = %amount.value,
                "Transfer completed"
            );

            self.notifications.dispatch(LedgerEvent::TransferCompleted {
                sender: sender.owner.clone(),
                recipient: receiver.owner.clone(),
                sender_name: actor.display_name.clone(),
                amount: amount.value,
                currency: amount.currency,
                reference: outcome.transaction.reference.clone(),
            });

            Ok(receipt(&outcome, &sender))
        })
        .await
    }

    async fn transfer_scope(
        &self,
        actor: &Actor,
        number: &WalletNumber,
        amount: Money,
        description: String,
        metadata: Metadata,
    ) -> Result<(MutationOutcome, Wallet, Wallet)> {
        let mut scope = self.store.begin().await?;

        let sender = scope
            .wallet_by_owner(&actor.user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("owner {}", actor.user_id)))?;
        if !sender.has_sufficient_balance(amount.value) {
            return Err(LedgerError::InsufficientFunds {
                required: amount.value,
                available: sender.balance,
            });
        }

        let receiver = scope
            .wallet_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("number {number}")))?;

        let kind = TransactionKind::transfer(sender.id, receiver.id)?;
        let transaction = Transaction::pending(kind, amount, Reference::transfer(), description, metadata);

        let outcome = self.engine.execute(scope.as_mut(), transaction).await?;
        scope.commit().await?;

        Ok((outcome, sender, receiver))
    }

    /// Credit the actor's wallet. The reference makes the deposit idempotent:
    /// a second deposit with it is rejected without touching any balance.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id, reference = %request.reference))]
    pub async fn deposit(&self, actor: &Actor, request: DepositRequest) -> Result<OperationReceipt> {
        self.tracked("deposit", async {
            let reference = Reference::parse(&request.reference)?;
            let wallet = self.query.wallet_by_owner(&actor.user_id).await?;
            let amount = Money::checked_amount(request.amount, wallet.currency)?;

            let description = description_or(request.description, DEPOSIT_DESCRIPTION);
            let mut metadata = request.metadata;
            metadata.insert(
                "paymentMethod".to_string(),
                method_or_default(request.payment_method),
            );
            metadata.insert("depositedBy".to_string(), actor.display_name.clone());

            let kind = TransactionKind::Deposit { to: wallet.id };
            let transaction = Transaction::pending(kind, amount, reference, description, metadata);
            let outcome = self.bounded("deposit", self.commit_mutation(transaction)).await?;

            info!(wallet_id = %wallet.id, amount = %amount.value, "Deposit completed");

            self.notifications.dispatch(LedgerEvent::DepositCompleted {
                owner: wallet.owner.clone(),
                amount: amount.value,
                currency: amount.currency,
                reference: outcome.transaction.reference.clone(),
            });

            Ok(receipt(&outcome, &wallet))
        })
        .await
    }

    /// Debit the actor's wallet to an external destination.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn withdraw(&self, actor: &Actor, request: WithdrawalRequest) -> Result<OperationReceipt> {
        self.tracked("withdraw", async {
            let wallet = self.query.wallet_by_owner(&actor.user_id).await?;
            let amount = Money::checked_amount(request.amount, wallet.currency)?;

            let description = description_or(request.description, WITHDRAWAL_DESCRIPTION);
            let mut metadata = Metadata::new();
            metadata.insert(
                "withdrawalMethod".to_string(),
                method_or_default(request.withdrawal_method),
            );
            metadata.insert("withdrawnBy".to_string(), actor.display_name.clone());

            let kind = TransactionKind::Withdrawal { from: wallet.id };
            let transaction =
                Transaction::pending(kind, amount, Reference::withdrawal(), description, metadata);
            let outcome = self.bounded("withdraw", self.commit_mutation(transaction)).await?;

            info!(wallet_id = %wallet.id, amount = %amount.value, "Withdrawal completed");

            self.notifications.dispatch(LedgerEvent::WithdrawalCompleted {
                owner: wallet.owner.clone(),
                amount: amount.value,
                currency: amount.currency,
                reference: outcome.transaction.reference.clone(),
            });

            Ok(receipt(&outcome, &wallet))
        })
        .await
    }

    async fn commit_mutation(&self, transaction: Transaction) -> Result<MutationOutcome> {
        let mut scope = self.store.begin().await?;
        let outcome = self.engine.execute(scope.as_mut(), transaction).await?;
        scope.commit().await?;
        Ok(outcome)
    }

    /// Balance of the actor's wallet.
    pub async fn get_balance(&self, actor: &Actor) -> Result<BalanceView> {
        self.query.balance(&actor.user_id).await
    }

    /// The actor's transaction history, newest first.
    pub async fn list_transactions(
        &self,
        actor: &Actor,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<TransactionSummary>> {
        self.query
            .list_transactions(&actor.user_id, filter, page)
            .await
    }

    /// Look up a transfer recipient by wallet number.
    pub async fn find_recipient(&self, actor: &Actor, wallet_number: &str) -> Result<RecipientView> {
        let number = WalletNumber::parse(wallet_number)?;
        let wallet = self.query.find_recipient(&actor.user_id, &number).await?;
        Ok(RecipientView {
            wallet_number: wallet.wallet_number,
            owner: wallet.owner,
            currency: wallet.currency,
        })
    }

    /// Wallet of `target`, readable by its owner and by admins.
    pub async fn wallet_for_user(&self, actor: &Actor, target: &UserId) -> Result<Wallet> {
        if !actor.can_access(target) {
            warn!(user_id = %actor.user_id, target = %target, "Wallet access denied");
            return Err(LedgerError::Forbidden(format!(
                "{} may not read the wallet of {target}",
                actor.user_id
            )));
        }
        self.query.wallet_by_owner(target).await
    }

    /// Create the wallet of a newly registered user.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn provision_wallet(&self, owner: &UserId, currency: Option<Currency>) -> Result<Wallet> {
        let currency = currency.unwrap_or(self.config.provisioning.default_currency);

        self.tracked("provision_wallet", async {
            let wallet = self.provisioner.provision(owner, currency).await?;
            self.metrics.wallet_provisioned();

            self.notifications.dispatch(LedgerEvent::WalletProvisioned {
                owner: wallet.owner.clone(),
                wallet_number: wallet.wallet_number.clone(),
                currency: wallet.currency,
            });

            Ok(wallet)
        })
        .await
    }

    /// Activate or deactivate a wallet. Admin only.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn set_wallet_active(&self, actor: &Actor, wallet: WalletId, active: bool) -> Result<Wallet> {
        if !actor.is_admin() {
            return Err(LedgerError::Forbidden(
                "Only admins may change wallet status".to_string(),
            ));
        }

        let wallet = self.store.set_wallet_active(wallet, active).await?;
        info!(wallet_id = %wallet.id, active, "Wallet status changed");
        Ok(wallet)
    }

    /// Check one wallet's balance against its history.
    pub async fn verify_wallet(&self, wallet: WalletId) -> Result<WalletAudit> {
        self.auditor.verify_wallet(wallet).await
    }

    /// Check every wallet's balance against its history.
    pub async fn verify_all(&self) -> Result<AuditReport> {
        self.auditor.verify_all().await
    }

    /// Run `work` under the scope deadline. Expiry drops `work`, which
    /// aborts any scope it holds.
    async fn bounded<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = self.config.execution.scope_timeout;
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "{operation} did not commit within {deadline:?}"
            ))),
        }
    }

    async fn tracked<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _in_flight = self.metrics.operation_started();

        match work.await {
            Ok(value) => {
                self.metrics.operation_succeeded();
                Ok(value)
            }
            Err(e) => {
                self.metrics.operation_errored(&e);
                if e.is_retryable() || matches!(e, LedgerError::Internal(_) | LedgerError::DatabaseError(_)) {
                    error!(operation, error = %e, code = e.error_code(), "Operation failed");
                } else {
                    warn!(operation, error = %e, code = e.error_code(), "Operation rejected");
                }
                Err(e)
            }
        }
    }
}

fn receipt(outcome: &MutationOutcome, wallet: &Wallet) -> OperationReceipt {
    let balance = outcome
        .change_for(wallet.id)
        .map_or(wallet.balance, |c| c.balance_after);

    OperationReceipt {
        transaction: outcome.transaction.summary_for(wallet.id),
        wallet: WalletSnapshot {
            id: wallet.id,
            wallet_number: wallet.wallet_number.clone(),
            balance,
            currency: wallet.currency,
        },
    }
}

fn description_or(description: Option<String>, default: &str) -> String {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn method_or_default(method: Option<String>) -> String {
    method
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_METHOD.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::LogNotifier;
    use payflow_ledger::MemoryLedgerStore;

    fn orchestrator() -> TransferOrchestrator {
        TransferOrchestrator::new(
            LedgerConfig::default(),
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(LogNotifier),
        )
    }

    #[test]
    fn test_description_defaults() {
        assert_eq!(description_or(None, DEPOSIT_DESCRIPTION), "Wallet deposit");
        assert_eq!(description_or(Some("  ".into()), DEPOSIT_DESCRIPTION), "Wallet deposit");
        assert_eq!(description_or(Some(" rent ".into()), DEPOSIT_DESCRIPTION), "rent");
        assert_eq!(method_or_default(None), "bank");
        assert_eq!(method_or_default(Some("card".into())), "card");
    }

    #[tokio::test]
    async fn test_wallet_for_user_requires_owner_or_admin() {
        let orchestrator = orchestrator();
        let bob = UserId::new("bob");
        orchestrator.provision_wallet(&bob, None).await.unwrap();

        let alice = Actor::user("alice", "Alice");
        assert!(matches!(
            orchestrator.wallet_for_user(&alice, &bob).await,
            Err(LedgerError::Forbidden(_))
        ));

        let admin = Actor::admin("ops", "Ops");
        assert_eq!(
            orchestrator.wallet_for_user(&admin, &bob).await.unwrap().owner,
            bob
        );
        assert!(orchestrator
            .wallet_for_user(&Actor::user("bob", "Bob"), &bob)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_only_admin_changes_status() {
        let orchestrator = orchestrator();
        let wallet = orchestrator
            .provision_wallet(&UserId::new("bob"), Some(Currency::Usd))
            .await
            .unwrap();
        assert_eq!(wallet.currency, Currency::Usd);

        let bob = Actor::user("bob", "Bob");
        assert!(orchestrator
            .set_wallet_active(&bob, wallet.id, false)
            .await
            .is_err());

        let admin = Actor::admin("ops", "Ops");
        let updated = orchestrator
            .set_wallet_active(&admin, wallet.id, false)
            .await
            .unwrap();
        assert!(!updated.is_active);
    }
}
