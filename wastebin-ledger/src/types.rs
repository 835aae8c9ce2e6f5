//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode in storage, JSON at the edges)
//! - Exact arithmetic (Decimal for weights and redeemable amounts)
//! - Explicit defaults (set in constructors, never ambient)

use crate::{Error, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User email address, the natural key for users
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Parse an email address
    ///
    /// Surrounding whitespace is trimmed. The address must contain exactly one
    /// `@` with non-empty parts on both sides.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();

        let mut parts = trimmed.split('@');
        let valid = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => !local.is_empty() && !domain.is_empty(),
            _ => false,
        };

        if !valid || trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "Malformed email address: {:?}",
                raw.as_ref()
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Email::parse(value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

/// Smart waste bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Bin ID (UUIDv7)
    pub id: Uuid,

    /// Capacity in weight units
    pub capacity: Decimal,

    /// Cumulative deposited weight
    pub current_weight: Decimal,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl Bin {
    /// Create a new bin
    pub fn new(capacity: Decimal, current_weight: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            capacity,
            current_weight,
            created_at: Utc::now(),
        }
    }

    /// Weight that can still be deposited before reaching capacity
    pub fn remaining_capacity(&self) -> Decimal {
        (self.capacity - self.current_weight).max(Decimal::ZERO)
    }

    /// Check if the bin is at or over capacity
    pub fn is_full(&self) -> bool {
        self.current_weight >= self.capacity
    }
}

/// Registered user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID (UUIDv7)
    pub id: Uuid,

    /// Unique email address
    pub email: Email,

    /// Argon2id PHC string of the credential (salt included)
    pub password_hash: String,

    /// Spendable points balance
    pub points: u64,

    /// Accumulated redeemable value
    pub amount: Decimal,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with zero balances
    ///
    /// The credential is hashed with Argon2id under a fresh random salt.
    pub fn new(email: Email, password: &str) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::PasswordHash(e.to_string()))?
            .to_string();

        Ok(Self {
            id: Uuid::now_v7(),
            email,
            password_hash,
            points: 0,
            amount: Decimal::ZERO,
            created_at: Utc::now(),
        })
    }

    /// Check a clear-text credential against the stored hash
    ///
    /// A stored value that does not parse as a PHC string never matches.
    pub fn password_matches(&self, password: &str) -> bool {
        match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Recorded deposit of weight into a bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Deposit ID (UUIDv7)
    pub id: Uuid,

    /// Bin the weight was deposited into
    pub bin_id: Uuid,

    /// Deposited weight
    pub weight: Decimal,

    /// Time the deposit was recorded
    pub request_date: DateTime<Utc>,

    /// Approval flag
    pub is_approved: bool,
}

impl DepositRequest {
    /// Create a deposit, approved and timestamped now
    pub fn new(bin_id: Uuid, weight: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            bin_id,
            weight,
            request_date: Utc::now(),
            is_approved: true,
        }
    }
}

/// Redeemed reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// Reward ID (UUIDv7)
    pub id: Uuid,

    /// Redeeming user
    pub user_email: Email,

    /// Points debited by the redemption
    pub points_required: u64,

    /// Value credited to the user's redeemable amount
    pub amount: Decimal,

    /// Redemption timestamp
    pub redeemed_at: DateTime<Utc>,
}

impl Reward {
    /// Create a reward record
    pub fn new(user_email: Email, points_required: u64, amount: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_email,
            points_required,
            amount,
            redeemed_at: Utc::now(),
        }
    }
}

/// Points balance after a grant or debit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBalance {
    /// Account email
    pub email: Email,

    /// Balance after the operation
    pub balance: u64,
}

/// Stored outcome of an idempotent grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Email the grant was applied to
    pub email: Email,

    /// Points granted
    pub points: u64,

    /// Balance returned by the original call
    pub balance: u64,
}

impl IdempotencyRecord {
    /// Check whether a repeated request matches the original one
    pub fn matches(&self, email: &Email, points: u64) -> bool {
        &self.email == email && self.points == points
    }
}
