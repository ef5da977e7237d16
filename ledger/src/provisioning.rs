//! Wallet provisioning.

use std::sync::Arc;

use parking_lot::Mutex;
use payflow_common::{Currency, LedgerError, Result, UserId, WalletNumber};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

use crate::store::{LedgerStore, WalletInsert};
use crate::wallet::Wallet;

/// Default number of wallet numbers tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Supplies candidate wallet numbers.
pub trait NumberSource: Send + Sync {
    fn next_number(&self) -> WalletNumber;
}

/// Uniformly random 10-digit numbers.
pub struct RandomNumberSource {
    rng: Mutex<StdRng>,
}

impl RandomNumberSource {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic source for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomNumberSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NumberSource for RandomNumberSource {
    fn next_number(&self) -> WalletNumber {
        WalletNumber::random(&mut *self.rng.lock())
    }
}

/// Creates the single wallet each user owns.
pub struct WalletProvisioner {
    store: Arc<dyn LedgerStore>,
    numbers: Arc<dyn NumberSource>,
    max_attempts: u32,
}

impl WalletProvisioner {
    pub fn new(store: Arc<dyn LedgerStore>, max_attempts: u32) -> Self {
        Self::with_source(store, Arc::new(RandomNumberSource::new()), max_attempts)
    }

    pub fn with_source(
        store: Arc<dyn LedgerStore>,
        numbers: Arc<dyn NumberSource>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            numbers,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create `owner`'s wallet with a fresh, unused wallet number.
    ///
    /// A candidate already in use, whether seen by the pre-check or by the
    /// insert losing a race, counts as one attempt.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn provision(&self, owner: &UserId, currency: Currency) -> Result<Wallet> {
        if !owner.is_valid() {
            return Err(LedgerError::invalid_field("owner", "Owner id must not be empty"));
        }
        if self.store.wallet_by_owner(owner).await?.is_some() {
            return Err(LedgerError::WalletAlreadyExists(owner.clone()));
        }

        for attempt in 1..=self.max_attempts {
            let number = self.numbers.next_number();

            if self.store.wallet_number_exists(&number).await? {
                debug!(attempt, wallet_number = %number, "Wallet number in use");
                continue;
            }

            let wallet = Wallet::new(owner.clone(), number, currency);
            match self.store.insert_wallet(&wallet).await? {
                WalletInsert::Inserted => {
                    info!(
                        wallet_id = %wallet.id,
                        wallet_number = %wallet.wallet_number,
                        attempt,
                        "Wallet provisioned"
                    );
                    return Ok(wallet);
                }
                WalletInsert::NumberTaken => {
                    debug!(attempt, wallet_number = %wallet.wallet_number, "Lost wallet number race");
                }
            }
        }

        warn!(attempts = self.max_attempts, "Wallet number space exhausted");
        Err(LedgerError::WalletNumberExhausted {
            attempts: self.max_attempts,
        })
    }
}
