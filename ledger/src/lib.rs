//! PayFlow Wallet Ledger
//!
//! Wallet and transaction model, the store abstraction with its in-memory and
//! PostgreSQL backends, the balance mutation engine, and the read side.

pub mod audit;
pub mod balance;
pub mod engine;
pub mod provisioning;
pub mod query;
pub mod store;
pub mod transaction;
pub mod wallet;

pub use audit::{AuditReport, LedgerAuditor, WalletAudit};
pub use balance::{BalanceChange, BalanceChangeType, BalanceView};
pub use engine::{BalanceMutationEngine, MutationOutcome};
pub use provisioning::{NumberSource, RandomNumberSource, WalletProvisioner};
pub use query::{LedgerQuery, Page, PageRequest, QueryLimits};
pub use store::{
    AtomicScope, BalanceSnapshot, LedgerStore, MemoryLedgerStore, Pagination, PgLedgerStore,
    TransactionFilter, WalletFlows,
};
pub use transaction::{
    Metadata, Transaction, TransactionKind, TransactionStatus, TransactionSummary, TransactionType,
};
pub use wallet::Wallet;
