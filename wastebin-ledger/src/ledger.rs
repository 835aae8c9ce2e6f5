//! Main ledger orchestration layer
//!
//! This module ties together storage, entity locks and metrics into the
//! high-level API for deposits, point grants and reward redemptions.
//!
//! Every mutation follows the same shape:
//!
//! 1. Validate input (no lock, no I/O)
//! 2. Acquire the lock of the one entity it touches
//! 3. Read current state and check invariants
//! 4. Commit all records in one `WriteBatch`
//!
//! A failure at any step leaves storage untouched.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wastebin_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> wastebin_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let bin = ledger.create_bin(Decimal::from(120), Decimal::ZERO).await?;
//!     ledger.record_deposit(bin.id, Decimal::new(35, 1)).await?;
//!
//!     ledger.register_user("alice@example.com", "secret").await?;
//!     ledger.grant_points("alice@example.com", 100, None).await?;
//!     let reward = ledger
//!         .redeem("alice@example.com", 60, Decimal::new(500, 2))
//!         .await?;
//!     println!("redeemed {}", reward.id);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    error::ErrorKind,
    locks::{EntityKey, EntityLocks},
    metrics::Metrics,
    storage::StorageStats,
    types::{Bin, DepositRequest, Email, IdempotencyRecord, PointsBalance, Reward, User},
    Config, Error, Result, Storage,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Storage backend
    storage: Arc<Storage>,

    /// Per-entity locks for mutations
    locks: EntityLocks,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let locks = EntityLocks::new(Duration::from_millis(config.ledger.lock_timeout_ms));
        let metrics = Metrics::new(&config.service_name, &config.service_version)
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            enforce_capacity = config.ledger.enforce_capacity,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            locks,
            metrics,
            config,
        })
    }

    /// Ledger metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Approximate record counts
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    // Deposit processor

    /// Record a deposit into a bin and return the updated bin
    ///
    /// The deposit record and the bin's new weight are committed together.
    pub async fn record_deposit(&self, bin_id: Uuid, weight: Decimal) -> Result<Bin> {
        let started = Instant::now();
        let result = self.record_deposit_inner(bin_id, weight).await;
        self.observe("deposit", started, result)
    }

    async fn record_deposit_inner(&self, bin_id: Uuid, weight: Decimal) -> Result<Bin> {
        if weight <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Deposit weight must be positive, got {}",
                weight
            )));
        }

        let _guard = self.locks.acquire(EntityKey::Bin(bin_id)).await?;

        let mut bin = self
            .storage
            .get_bin(bin_id)?
            .ok_or(Error::BinNotFound(bin_id))?;

        let new_weight = bin
            .current_weight
            .checked_add(weight)
            .ok_or_else(|| Error::InvalidInput(format!("Deposit weight {} overflows", weight)))?;

        if self.config.ledger.enforce_capacity && weight > bin.remaining_capacity() {
            return Err(Error::CapacityExceeded {
                capacity: bin.capacity,
                current: bin.current_weight,
                requested: weight,
            });
        }

        let deposit = DepositRequest::new(bin_id, weight);
        bin.current_weight = new_weight;

        self.storage.commit_deposit(&deposit, &bin)?;
        self.metrics
            .record_deposit(weight.to_f64().unwrap_or_default());

        tracing::info!(
            bin_id = %bin_id,
            deposit_id = %deposit.id,
            weight = %weight,
            current_weight = %bin.current_weight,
            "Deposit recorded"
        );

        Ok(bin)
    }

    // Points allocator

    /// Credit points to a user
    ///
    /// Without an idempotency key every call applies the grant again. With a
    /// key, the first call's outcome is stored alongside the balance and
    /// replayed for later calls carrying the same key.
    pub async fn grant_points(
        &self,
        email: &str,
        points: u64,
        idempotency_key: Option<&str>,
    ) -> Result<PointsBalance> {
        let started = Instant::now();
        let result = self.grant_points_inner(email, points, idempotency_key).await;
        self.observe("grant", started, result)
    }

    async fn grant_points_inner(
        &self,
        email: &str,
        points: u64,
        idempotency_key: Option<&str>,
    ) -> Result<PointsBalance> {
        let email = Email::parse(email)?;
        if points == 0 {
            return Err(Error::InvalidInput("Granted points must be positive".to_string()));
        }

        // Key lock before user lock, always in that order
        let _key_guard = match idempotency_key {
            Some(key) if key.is_empty() => {
                return Err(Error::InvalidInput("Idempotency key must not be empty".to_string()))
            }
            Some(key) => {
                let guard = self
                    .locks
                    .acquire(EntityKey::Idempotency(key.to_string()))
                    .await?;

                if let Some(record) = self.storage.get_idempotency(key)? {
                    if !record.matches(&email, points) {
                        return Err(Error::IdempotencyKeyReused(key.to_string()));
                    }
                    tracing::info!(email = %email, key, "Replaying idempotent grant");
                    return Ok(PointsBalance {
                        email,
                        balance: record.balance,
                    });
                }

                Some(guard)
            }
            None => None,
        };

        let _guard = self.locks.acquire(EntityKey::User(email.clone())).await?;

        let mut user = self.load_user(&email)?;
        user.points = user.points.checked_add(points).ok_or_else(|| {
            Error::InvalidInput(format!("Granting {} points overflows the balance", points))
        })?;

        let record = IdempotencyRecord {
            email: email.clone(),
            points,
            balance: user.points,
        };
        let idempotency = idempotency_key.map(|key| (key, &record));

        self.storage.commit_points(&user, idempotency)?;
        self.metrics.record_grant(points);

        tracing::info!(email = %email, points, balance = user.points, "Points granted");

        Ok(PointsBalance {
            email,
            balance: user.points,
        })
    }

    /// Remove points from a user without creating a reward
    pub async fn debit_points(&self, email: &str, points: u64) -> Result<PointsBalance> {
        let started = Instant::now();
        let result = self.debit_points_inner(email, points).await;
        self.observe("debit", started, result)
    }

    async fn debit_points_inner(&self, email: &str, points: u64) -> Result<PointsBalance> {
        let email = Email::parse(email)?;
        if points == 0 {
            return Err(Error::InvalidInput("Debited points must be positive".to_string()));
        }

        let _guard = self.locks.acquire(EntityKey::User(email.clone())).await?;

        let mut user = self.load_user(&email)?;
        user.points = user
            .points
            .checked_sub(points)
            .ok_or(Error::InsufficientBalance {
                available: user.points,
                required: points,
            })?;

        self.storage.commit_points(&user, None)?;
        self.metrics.record_debit(points);

        tracing::info!(email = %email, points, balance = user.points, "Points debited");

        Ok(PointsBalance {
            email,
            balance: user.points,
        })
    }

    // Reward ledger

    /// Redeem points for a reward
    ///
    /// The balance check, the debit/credit and the reward record are one unit
    /// under the user's lock, so concurrent redemptions never both pass the
    /// check against the same balance.
    pub async fn redeem(
        &self,
        email: &str,
        points_required: u64,
        amount: Decimal,
    ) -> Result<Reward> {
        let started = Instant::now();
        let result = self.redeem_inner(email, points_required, amount).await;
        self.observe("redeem", started, result)
    }

    async fn redeem_inner(
        &self,
        email: &str,
        points_required: u64,
        amount: Decimal,
    ) -> Result<Reward> {
        let email = Email::parse(email)?;
        if amount < Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "Reward amount must not be negative, got {}",
                amount
            )));
        }

        let _guard = self.locks.acquire(EntityKey::User(email.clone())).await?;

        let mut user = self.load_user(&email)?;
        if user.points < points_required {
            return Err(Error::InsufficientBalance {
                available: user.points,
                required: points_required,
            });
        }

        user.points -= points_required;
        user.amount = user
            .amount
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidInput(format!("Reward amount {} overflows", amount)))?;

        let reward = Reward::new(email.clone(), points_required, amount);

        self.storage.commit_redemption(&user, &reward)?;
        self.metrics.record_redemption(points_required);

        tracing::info!(
            email = %email,
            reward_id = %reward.id,
            points_required,
            amount = %amount,
            balance = user.points,
            "Reward redeemed"
        );

        Ok(reward)
    }

    // Queries

    /// Current points balance of a user
    pub async fn get_points(&self, email: &str) -> Result<u64> {
        let email = Email::parse(email)?;
        Ok(self.load_user(&email)?.points)
    }

    /// All deposits in creation order
    pub async fn list_deposits(&self) -> Result<Vec<DepositRequest>> {
        self.storage.list_deposits()
    }

    /// Deposits into one bin
    pub async fn list_bin_deposits(&self, bin_id: Uuid) -> Result<Vec<DepositRequest>> {
        self.storage.list_bin_deposits(bin_id)
    }

    /// All rewards in creation order
    pub async fn list_rewards(&self) -> Result<Vec<Reward>> {
        self.storage.list_rewards()
    }

    /// Rewards redeemed by one user
    pub async fn list_user_rewards(&self, email: &str) -> Result<Vec<Reward>> {
        let email = Email::parse(email)?;
        self.storage.list_user_rewards(&email)
    }

    // Bin registry

    /// Register a bin
    pub async fn create_bin(&self, capacity: Decimal, current_weight: Decimal) -> Result<Bin> {
        validate_bin_levels(capacity, current_weight)?;

        let bin = Bin::new(capacity, current_weight);
        self.storage.put_bin(&bin)?;

        tracing::info!(bin_id = %bin.id, capacity = %capacity, "Bin created");

        Ok(bin)
    }

    /// Get bin by ID
    pub async fn get_bin(&self, bin_id: Uuid) -> Result<Bin> {
        self.storage
            .get_bin(bin_id)?
            .ok_or(Error::BinNotFound(bin_id))
    }

    /// All bins
    pub async fn list_bins(&self) -> Result<Vec<Bin>> {
        self.storage.list_bins()
    }

    /// Replace a bin's capacity and weight (servicing, emptying)
    pub async fn update_bin(
        &self,
        bin_id: Uuid,
        capacity: Decimal,
        current_weight: Decimal,
    ) -> Result<Bin> {
        validate_bin_levels(capacity, current_weight)?;

        let _guard = self.locks.acquire(EntityKey::Bin(bin_id)).await?;

        let mut bin = self
            .storage
            .get_bin(bin_id)?
            .ok_or(Error::BinNotFound(bin_id))?;
        bin.capacity = capacity;
        bin.current_weight = current_weight;
        self.storage.put_bin(&bin)?;

        tracing::info!(
            bin_id = %bin_id,
            capacity = %capacity,
            current_weight = %current_weight,
            "Bin updated"
        );

        Ok(bin)
    }

    /// Remove a bin; its deposit history stays readable
    pub async fn delete_bin(&self, bin_id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire(EntityKey::Bin(bin_id)).await?;

        if self.storage.get_bin(bin_id)?.is_none() {
            return Err(Error::BinNotFound(bin_id));
        }
        self.storage.delete_bin(bin_id)?;

        tracing::info!(bin_id = %bin_id, "Bin deleted");

        Ok(())
    }

    // User registry

    /// Register a user with zero balances
    pub async fn register_user(&self, email: &str, password: &str) -> Result<User> {
        let email = Email::parse(email)?;
        if password.is_empty() {
            return Err(Error::InvalidInput("Password must not be empty".to_string()));
        }

        // Hash outside the lock
        let user = User::new(email.clone(), password)?;

        let _guard = self.locks.acquire(EntityKey::User(email.clone())).await?;

        if self.storage.get_user_by_email(&email)?.is_some() {
            return Err(Error::AlreadyExists(email.to_string()));
        }

        self.storage.insert_user(&user)?;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");

        Ok(user)
    }

    /// Get user by email
    pub async fn get_user(&self, email: &str) -> Result<User> {
        let email = Email::parse(email)?;
        self.load_user(&email)
    }

    /// All users
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.storage.list_users()
    }

    /// Remove a user; their rewards stay readable
    pub async fn delete_user(&self, email: &str) -> Result<()> {
        let email = Email::parse(email)?;
        let _guard = self.locks.acquire(EntityKey::User(email.clone())).await?;

        let user = self.load_user(&email)?;
        self.storage.delete_user(&user)?;

        tracing::info!(user_id = %user.id, email = %email, "User deleted");

        Ok(())
    }

    /// Check a user's credential
    ///
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User> {
        let email = Email::parse(email).map_err(|_| Error::InvalidCredentials)?;

        match self.storage.get_user_by_email(&email)? {
            Some(user) if user.password_matches(password) => Ok(user),
            _ => {
                tracing::warn!(email = %email, "Credential check failed");
                Err(Error::InvalidCredentials)
            }
        }
    }

    // Helpers

    fn load_user(&self, email: &Email) -> Result<User> {
        self.storage
            .get_user_by_email(email)?
            .ok_or_else(|| Error::UserNotFound(email.to_string()))
    }

    fn observe<T>(&self, operation: &str, started: Instant, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self
                .metrics
                .record_duration(started.elapsed().as_secs_f64()),
            Err(e) => {
                let kind = e.kind();
                self.metrics.record_rejection(operation, kind);
                match kind {
                    ErrorKind::StorageUnavailable | ErrorKind::Internal => {
                        tracing::error!(operation, error = %e, "Ledger operation failed")
                    }
                    _ => tracing::warn!(operation, error = %e, "Ledger operation rejected"),
                }
            }
        }
        result
    }
}

fn validate_bin_levels(capacity: Decimal, current_weight: Decimal) -> Result<()> {
    if capacity <= Decimal::ZERO {
        return Err(Error::InvalidInput(format!(
            "Bin capacity must be positive, got {}",
            capacity
        )));
    }
    if current_weight < Decimal::ZERO {
        return Err(Error::InvalidInput(format!(
            "Bin weight must not be negative, got {}",
            current_weight
        )));
    }
    Ok(())
}
