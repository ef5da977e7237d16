//! PostgreSQL ledger store.
//!
//! Each [`AtomicScope`] is one database transaction. Wallets about to be
//! mutated are read with `SELECT ... FOR UPDATE`, so concurrent scopes on the
//! same wallet queue on the row lock and the later one re-reads the earlier
//! one's committed balance. Uniqueness of owners, wallet numbers and
//! references is enforced by constraints, and a `CHECK (balance >= 0)` backs
//! the engine's own overdraft check.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payflow_common::{
    Currency, LedgerError, Reference, Result, TransactionId, UserId, WalletId, WalletNumber,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AtomicScope, BalanceSnapshot, LedgerStore, Pagination, TransactionFilter, WalletFlows,
    WalletInsert,
};
use crate::transaction::{Metadata, Transaction, TransactionKind, TransactionStatus, TransactionType};
use crate::wallet::Wallet;

const WALLET_SELECT: &str = "SELECT w.id, w.owner_id, w.wallet_number, w.balance, w.currency, \
     w.is_active, w.created_at, w.updated_at, \
     ARRAY(SELECT wt.transaction_id FROM wallet_transactions wt \
           WHERE wt.wallet_id = w.id ORDER BY wt.seq) AS transaction_ids \
     FROM wallets w";

const TRANSACTION_SELECT: &str = "SELECT id, kind, amount, currency, from_wallet, to_wallet, \
     description, reference, status, metadata, created_at, updated_at FROM transactions";

const OWNER_CONSTRAINT: &str = "wallets_owner_id_key";
const NUMBER_CONSTRAINT: &str = "wallets_wallet_number_key";
const REFERENCE_CONSTRAINT: &str = "transactions_reference_key";

/// Connection settings for [`PgLedgerStore`].
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    /// Database URL.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// How long a scope waits on a row lock before giving up.
    pub lock_timeout: Duration,
}

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Connect a new pool.
    pub async fn connect(options: &PgStoreOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(&options.database_url)
            .await
            .map_err(db_error)?;

        info!(
            max_connections = options.max_connections,
            "Connected to ledger database"
        );

        Ok(Self::from_pool(pool, options.lock_timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;
        info!("Ledger schema up to date");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn AtomicScope>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // SET does not take bind parameters; the value is an integer we own.
        let lock_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&lock_timeout)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Ok(Box::new(PgScope { tx }))
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<WalletInsert> {
        let result = sqlx::query(
            "INSERT INTO wallets \
             (id, owner_id, wallet_number, balance, currency, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(*wallet.id.as_uuid())
        .bind(wallet.owner.as_str())
        .bind(wallet.wallet_number.as_str())
        .bind(wallet.balance)
        .bind(wallet.currency.code())
        .bind(wallet.is_active)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(WalletInsert::Inserted),
            Err(e) => match violated_unique_constraint(&e).as_deref() {
                Some(OWNER_CONSTRAINT) => {
                    Err(LedgerError::WalletAlreadyExists(wallet.owner.clone()))
                }
                Some(NUMBER_CONSTRAINT) => {
                    debug!(wallet_number = %wallet.wallet_number, "Wallet number taken on insert");
                    Ok(WalletInsert::NumberTaken)
                }
                _ => Err(db_error(e)),
            },
        }
    }

    async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;

        let updated = sqlx::query("UPDATE wallets SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(active)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id.to_string()));
        }

        fetch_wallet_by_id(&mut conn, id, false)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        fetch_wallet_by_id(&mut conn, id, false).await
    }

    async fn wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        fetch_wallet_by_owner(&mut conn, owner).await
    }

    async fn wallet_by_number(&self, number: &WalletNumber) -> Result<Option<Wallet>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        fetch_wallet_by_number(&mut conn, number).await
    }

    async fn wallet_number_exists(&self, number: &WalletNumber) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM wallets WHERE wallet_number = $1)")
            .bind(number.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!("{TRANSACTION_SELECT} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transaction_by_reference(
        &self,
        reference: &Reference,
    ) -> Result<Option<Transaction>> {
        let sql = format!("{TRANSACTION_SELECT} WHERE reference = $1");
        let row = sqlx::query(&sql)
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        wallet: WalletId,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<(Vec<Transaction>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_history_filter(&mut count, wallet, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut select = QueryBuilder::<Postgres>::new(TRANSACTION_SELECT);
        push_history_filter(&mut select, wallet, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok((items, total.max(0) as u64))
    }

    async fn balance_snapshots(&self, wallet: Option<WalletId>) -> Result<Vec<BalanceSnapshot>> {
        // One statement, so balances and sums share one snapshot.
        let rows = sqlx::query(
            "SELECT w.id, w.balance, \
               COALESCE(SUM(t.amount) FILTER (WHERE t.to_wallet = w.id), 0) AS credits, \
               COALESCE(SUM(t.amount) FILTER (WHERE t.from_wallet = w.id), 0) AS debits \
             FROM wallets w \
             LEFT JOIN transactions t \
               ON t.status = 'COMPLETED' AND (t.to_wallet = w.id OR t.from_wallet = w.id) \
             WHERE $1::uuid IS NULL OR w.id = $1 \
             GROUP BY w.id, w.balance, w.created_at \
             ORDER BY w.created_at, w.id",
        )
        .bind(wallet.map(|id| *id.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(BalanceSnapshot {
                    wallet_id: WalletId::from_uuid(col(row, "id")?),
                    balance: col(row, "balance")?,
                    flows: WalletFlows {
                        credits: col(row, "credits")?,
                        debits: col(row, "debits")?,
                    },
                })
            })
            .collect()
    }
}

/// Scope over a [`PgLedgerStore`]: one database transaction.
pub struct PgScope {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl AtomicScope for PgScope {
    async fn wallet_by_owner(&mut self, owner: &UserId) -> Result<Option<Wallet>> {
        fetch_wallet_by_owner(&mut self.tx, owner).await
    }

    async fn wallet_by_number(&mut self, number: &WalletNumber) -> Result<Option<Wallet>> {
        fetch_wallet_by_number(&mut self.tx, number).await
    }

    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        fetch_wallet_by_id(&mut self.tx, id, true).await
    }

    async fn reference_exists(&mut self, reference: &Reference) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transactions WHERE reference = $1)")
            .bind(reference.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn update_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE wallets SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(balance)
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn append_wallet_transaction(&mut self, id: WalletId, tx: TransactionId) -> Result<()> {
        sqlx::query("INSERT INTO wallet_transactions (wallet_id, transaction_id) VALUES ($1, $2)")
            .bind(*id.as_uuid())
            .bind(*tx.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO transactions \
             (id, kind, amount, currency, from_wallet, to_wallet, description, reference, \
              status, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*tx.id.as_uuid())
        .bind(tx.transaction_type().as_str())
        .bind(tx.amount)
        .bind(tx.currency.code())
        .bind(tx.kind.from_wallet().map(|w| *w.as_uuid()))
        .bind(tx.kind.to_wallet().map(|w| *w.as_uuid()))
        .bind(tx.description.as_str())
        .bind(tx.reference.as_str())
        .bind(tx.status.as_str())
        .bind(Json(&tx.metadata))
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violated_unique_constraint(&e).as_deref() == Some(REFERENCE_CONSTRAINT) => {
                Err(LedgerError::DuplicateReference(tx.reference.to_string()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn update_transaction_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE transactions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(status.as_str())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::TransactionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

async fn fetch_wallet_by_id(
    conn: &mut PgConnection,
    id: WalletId,
    lock: bool,
) -> Result<Option<Wallet>> {
    let sql = format!(
        "{WALLET_SELECT} WHERE w.id = $1{}",
        if lock { " FOR UPDATE OF w" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.as_ref().map(wallet_from_row).transpose()
}

async fn fetch_wallet_by_owner(conn: &mut PgConnection, owner: &UserId) -> Result<Option<Wallet>> {
    let sql = format!("{WALLET_SELECT} WHERE w.owner_id = $1");
    let row = sqlx::query(&sql)
        .bind(owner.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.as_ref().map(wallet_from_row).transpose()
}

async fn fetch_wallet_by_number(
    conn: &mut PgConnection,
    number: &WalletNumber,
) -> Result<Option<Wallet>> {
    let sql = format!("{WALLET_SELECT} WHERE w.wallet_number = $1");
    let row = sqlx::query(&sql)
        .bind(number.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.as_ref().map(wallet_from_row).transpose()
}

fn push_history_filter(
    qb: &mut QueryBuilder<'_, Postgres>,
    wallet: WalletId,
    filter: &TransactionFilter,
) {
    let id = *wallet.as_uuid();
    qb.push(" WHERE (from_wallet = ")
        .push_bind(id)
        .push(" OR to_wallet = ")
        .push_bind(id)
        .push(")");

    if let Some(start) = filter.date_range.start {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.date_range.end {
        qb.push(" AND created_at <= ").push_bind(end);
    }
    if let Some(kind) = filter.transaction_type {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(db_error)
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    let number: String = col(row, "wallet_number")?;
    let currency: String = col(row, "currency")?;
    let transaction_ids: Vec<Uuid> = col(row, "transaction_ids")?;

    Ok(Wallet {
        id: WalletId::from_uuid(col(row, "id")?),
        owner: UserId::new(col::<String>(row, "owner_id")?),
        wallet_number: WalletNumber::parse(&number)?,
        balance: col(row, "balance")?,
        currency: currency.parse::<Currency>()?,
        is_active: col(row, "is_active")?,
        transactions: transaction_ids
            .into_iter()
            .map(TransactionId::from_uuid)
            .collect(),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let kind: String = col(row, "kind")?;
    let from: Option<Uuid> = col(row, "from_wallet")?;
    let to: Option<Uuid> = col(row, "to_wallet")?;
    let currency: String = col(row, "currency")?;
    let reference: String = col(row, "reference")?;
    let status: String = col(row, "status")?;
    let Json(metadata): Json<Metadata> = col(row, "metadata")?;

    Ok(Transaction {
        id: TransactionId::from_uuid(col(row, "id")?),
        kind: TransactionKind::from_parts(
            kind.parse::<TransactionType>()?,
            from.map(WalletId::from_uuid),
            to.map(WalletId::from_uuid),
        )?,
        amount: col(row, "amount")?,
        currency: currency.parse::<Currency>()?,
        description: col(row, "description")?,
        reference: Reference::parse(&reference)?,
        status: status.parse::<TransactionStatus>()?,
        metadata,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn violated_unique_constraint(err: &sqlx::Error) -> Option<String> {
    let db = err.as_database_error()?;
    if db.code().as_deref() != Some("23505") {
        return None;
    }
    db.constraint().map(str::to_string)
}

/// Map a driver error onto the ledger taxonomy.
fn db_error(err: sqlx::Error) -> LedgerError {
    if let Some(db) = err.as_database_error() {
        match db.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => {
                return LedgerError::StorageConflict(db.message().to_string());
            }
            // numeric_value_out_of_range
            Some("22003") => {
                return LedgerError::InvalidAmount {
                    message: format!("Amount out of range: {}", db.message()),
                };
            }
            _ => {}
        }
    }

    match err {
        sqlx::Error::PoolTimedOut => {
            LedgerError::StorageConflict("Timed out waiting for a database connection".to_string())
        }
        other => LedgerError::DatabaseError(other.to_string()),
    }
}
