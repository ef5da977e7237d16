//! Service configuration.

use std::time::Duration;

use payflow_common::constants;
use payflow_common::{Currency, DurationExt, LedgerError, Result};
use payflow_ledger::provisioning::DEFAULT_MAX_ATTEMPTS;
use payflow_ledger::query::{QueryLimits, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use payflow_ledger::store::postgres::PgStoreOptions;

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database URL.
    pub database_url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Connection acquisition timeout.
    pub acquire_timeout: Duration,
    /// Row lock wait limit inside a scope.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/payflow".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(3),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

impl StoreConfig {
    /// Options for the PostgreSQL backend.
    pub fn pg_options(&self) -> PgStoreOptions {
        PgStoreOptions {
            database_url: self.database_url.clone(),
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
            lock_timeout: self.lock_timeout,
        }
    }
}

/// Wallet provisioning configuration.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Wallet numbers tried before giving up.
    pub max_attempts: u32,
    /// Currency of newly provisioned wallets.
    pub default_currency: Currency,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_currency: Currency::default(),
        }
    }
}

/// History query configuration.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Page size when none is requested.
    pub default_limit: u32,
    /// Largest page size served.
    pub max_limit: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl QueryConfig {
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

/// Operation execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Deadline for one atomic scope, open to commit.
    pub scope_timeout: Duration,
    /// Deadline for one notification delivery.
    pub notification_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            scope_timeout: constants::default_scope_timeout().as_std(),
            notification_timeout: constants::notification_timeout().as_std(),
        }
    }
}

/// Main ledger service configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Storage configuration.
    pub store: StoreConfig,
    /// Provisioning configuration.
    pub provisioning: ProvisioningConfig,
    /// Query configuration.
    pub query: QueryConfig,
    /// Execution configuration.
    pub execution: ExecutionConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            provisioning: ProvisioningConfig::default(),
            query: QueryConfig::default(),
            execution: ExecutionConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.store.database_url = url;
        }
        if let Some(n) = parsed(&lookup, "PAYFLOW_DB_MAX_CONNECTIONS") {
            config.store.max_connections = n;
        }
        if let Some(ms) = parsed(&lookup, "PAYFLOW_DB_ACQUIRE_TIMEOUT_MS") {
            config.store.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(&lookup, "PAYFLOW_DB_LOCK_TIMEOUT_MS") {
            config.store.lock_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parsed(&lookup, "PAYFLOW_WALLET_NUMBER_ATTEMPTS") {
            config.provisioning.max_attempts = n;
        }
        if let Some(currency) = parsed(&lookup, "PAYFLOW_DEFAULT_CURRENCY") {
            config.provisioning.default_currency = currency;
        }

        if let Some(n) = parsed(&lookup, "PAYFLOW_PAGE_LIMIT_DEFAULT") {
            config.query.default_limit = n;
        }
        if let Some(n) = parsed(&lookup, "PAYFLOW_PAGE_LIMIT_MAX") {
            config.query.max_limit = n;
        }

        if let Some(ms) = parsed(&lookup, "PAYFLOW_SCOPE_TIMEOUT_MS") {
            config.execution.scope_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(&lookup, "PAYFLOW_NOTIFICATION_TIMEOUT_MS") {
            config.execution.notification_timeout = Duration::from_millis(ms);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LedgerError::ConfigurationError(msg.to_string()));

        if self.store.database_url.is_empty() {
            return invalid("Database URL cannot be empty");
        }
        if self.store.max_connections == 0 {
            return invalid("Connection pool size cannot be 0");
        }
        if self.provisioning.max_attempts == 0 {
            return invalid("Wallet number attempts cannot be 0");
        }
        if self.query.default_limit == 0 || self.query.max_limit == 0 {
            return invalid("Page limits cannot be 0");
        }
        if self.query.default_limit > self.query.max_limit {
            return invalid("Default page limit cannot exceed max page limit");
        }
        if self.execution.scope_timeout.is_zero() {
            return invalid("Scope timeout cannot be 0");
        }

        Ok(())
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.default_limit, 10);
        assert_eq!(config.query.max_limit, 100);
        assert_eq!(config.provisioning.max_attempts, 10);
        assert_eq!(config.execution.scope_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.query.default_limit = 500;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.store.database_url.clear();
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://db/ledger"),
            ("PAYFLOW_SCOPE_TIMEOUT_MS", "250"),
            ("PAYFLOW_DEFAULT_CURRENCY", "usd"),
            ("PAYFLOW_PAGE_LIMIT_MAX", "not-a-number"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config = LedgerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.store.database_url, "postgres://db/ledger");
        assert_eq!(config.execution.scope_timeout, Duration::from_millis(250));
        assert_eq!(config.provisioning.default_currency, Currency::Usd);
        assert_eq!(config.query.max_limit, 100);
        assert_eq!(config.log_level, "debug");
    }
}
