//! Identifier types for PayFlow ledger entities.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::LedgerError;

/// Number of digits in a public wallet number.
pub const WALLET_NUMBER_LEN: usize = 10;

/// Maximum length of a transaction reference.
pub const MAX_REFERENCE_LEN: usize = 64;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Unique identifier for a wallet.
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(Uuid);

impl WalletId {
    /// Create a new wallet ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger transaction.
/// UUID v7, so ids sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new transaction ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the user ID format.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty() && self.0.len() <= 128
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Public 10-digit wallet number used to address transfer recipients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletNumber(String);

impl WalletNumber {
    /// Parse a wallet number, rejecting anything but ten ASCII digits with a
    /// non-zero leading digit.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let s = s.trim();
        let well_formed = s.len() == WALLET_NUMBER_LEN
            && s.bytes().all(|b| b.is_ascii_digit())
            && !s.starts_with('0');

        if !well_formed {
            return Err(LedgerError::InvalidInput {
                message: format!("Wallet number must be {WALLET_NUMBER_LEN} digits"),
                field: Some("wallet_number".to_string()),
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Draw a uniformly random wallet number.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let value: u64 = rng.gen_range(1_000_000_000..10_000_000_000);
        Self(value.to_string())
    }

    /// Get the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WalletNumber {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletNumber> for String {
    fn from(value: WalletNumber) -> Self {
        value.0
    }
}

/// Unique transaction reference. Doubles as the idempotency key for
/// caller-supplied deposits and as the human-facing transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    /// Validate a caller-supplied reference.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LedgerError::InvalidInput {
                message: "Reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        if s.len() > MAX_REFERENCE_LEN || s.chars().any(char::is_control) {
            return Err(LedgerError::InvalidInput {
                message: format!("Reference must be at most {MAX_REFERENCE_LEN} printable characters"),
                field: Some("reference".to_string()),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Generate `<prefix>-<unix millis>-<8 base36 chars>`.
    pub fn generate(prefix: &str) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(format!(
            "{}-{}-{}",
            prefix,
            chrono::Utc::now().timestamp_millis(),
            suffix
        ))
    }

    /// Reference for an engine-initiated transfer.
    pub fn transfer() -> Self {
        Self::generate("TFR")
    }

    /// Reference for an engine-initiated withdrawal.
    pub fn withdrawal() -> Self {
        Self::generate("TXN")
    }

    /// Get the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Reference {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Reference> for String {
    fn from(value: Reference) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_id_creation() {
        let id1 = WalletId::new();
        let id2 = WalletId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_transaction_id_parse() {
        let uuid_str = "019456ab-1234-7def-8901-234567890abc";
        let id = TransactionId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_wallet_number_validation() {
        assert!(WalletNumber::parse("1234567890").is_ok());
        assert!(WalletNumber::parse(" 9876543210 ").is_ok());
        assert!(WalletNumber::parse("0123456789").is_err());
        assert!(WalletNumber::parse("123456789").is_err());
        assert!(WalletNumber::parse("12345678901").is_err());
        assert!(WalletNumber::parse("12345abcde").is_err());
    }

    #[test]
    fn test_random_wallet_number_is_well_formed() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let number = WalletNumber::random(&mut rng);
            assert!(WalletNumber::parse(number.as_str()).is_ok());
        }
    }

    #[test]
    fn test_generated_reference_shape() {
        let reference = Reference::transfer();
        let parts: Vec<&str> = reference.as_str().split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TFR");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(Reference::transfer(), Reference::transfer());
    }

    #[test]
    fn test_reference_validation() {
        assert!(Reference::parse("TXN-1").is_ok());
        assert!(Reference::parse("   ").is_err());
        assert!(Reference::parse(&"x".repeat(MAX_REFERENCE_LEN + 1)).is_err());
    }
}
