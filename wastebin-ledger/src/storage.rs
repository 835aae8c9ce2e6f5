//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `bins` - Smart bins (key: bin_id)
//! - `users` - Registered users (key: user_id)
//! - `deposits` - Immutable deposit records (key: deposit_id)
//! - `rewards` - Immutable reward records (key: reward_id)
//! - `indices` - Secondary indices (email -> user, bin -> deposits, user -> rewards,
//!   user -> idempotency keys)
//! - `idempotency` - Outcomes of keyed point grants (key: idempotency key)
//!
//! Idempotency records live as long as the user they were granted to and are
//! purged together with it by [`Storage::delete_user`].
//!
//! Every ledger mutation is a single `WriteBatch`, so a crash either applies
//! all of its records or none of them.

use crate::{
    error::{Error, Result},
    types::{Bin, DepositRequest, Email, IdempotencyRecord, Reward, User},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Column family names
const CF_BINS: &str = "bins";
const CF_USERS: &str = "users";
const CF_DEPOSITS: &str = "deposits";
const CF_REWARDS: &str = "rewards";
const CF_INDICES: &str = "indices";
const CF_IDEMPOTENCY: &str = "idempotency";

/// Index key tags
const IDX_EMAIL: u8 = b'e';
const IDX_BIN_DEPOSIT: u8 = b'd';
const IDX_USER_REWARD: u8 = b'r';
const IDX_USER_IDEMPOTENCY: u8 = b'k';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    sync_writes: bool,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BINS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_DEPOSITS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_REWARDS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_entities()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_entities() -> Options {
        let mut opts = Options::default();
        // Entities are read on every mutation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StorageUnavailable(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn scan_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            values.push(bincode::deserialize(&value)?);
        }
        Ok(values)
    }

    /// Remainder of every index key under `prefix`
    fn scan_index_tails(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let mut tails = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            tails.push(key[prefix.len()..].to_vec());
        }

        Ok(tails)
    }

    /// Trailing 16-byte ids of every index key under `prefix`
    fn scan_index_ids(&self, prefix: &[u8]) -> Result<Vec<Uuid>> {
        self.scan_index_tails(prefix)?
            .into_iter()
            .map(|tail| {
                let id_bytes: [u8; 16] = tail
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::StorageUnavailable("Corrupt index key".to_string()))?;
                Ok(Uuid::from_bytes(id_bytes))
            })
            .collect()
    }

    // Bin operations

    /// Get bin by ID
    pub fn get_bin(&self, bin_id: Uuid) -> Result<Option<Bin>> {
        self.get_value(CF_BINS, bin_id.as_bytes())
    }

    /// Put bin (create or replace)
    pub fn put_bin(&self, bin: &Bin) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_BINS)?, bin.id.as_bytes(), bincode::serialize(bin)?);
        self.write(batch)
    }

    /// Delete bin, keeping its deposit history
    pub fn delete_bin(&self, bin_id: Uuid) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf_handle(CF_BINS)?, bin_id.as_bytes());
        self.write(batch)
    }

    /// List all bins in creation order
    pub fn list_bins(&self) -> Result<Vec<Bin>> {
        self.scan_all(CF_BINS)
    }

    // User operations

    /// Get user by email (via index)
    pub fn get_user_by_email(&self, email: &Email) -> Result<Option<User>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let user_id = match self.db.get_cf(cf_indices, Self::index_key_email(email))? {
            Some(bytes) => {
                let id_bytes: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    Error::StorageUnavailable(format!("Corrupt email index for {}", email))
                })?;
                Uuid::from_bytes(id_bytes)
            }
            None => return Ok(None),
        };

        self.get_value(CF_USERS, user_id.as_bytes())
    }

    /// Insert user with its email index (atomic)
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_USERS)?,
            user.id.as_bytes(),
            bincode::serialize(user)?,
        );
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            Self::index_key_email(&user.email),
            user.id.as_bytes(),
        );
        self.write(batch)
    }

    /// Delete user, its email index and its idempotency records (atomic),
    /// keeping its rewards
    pub fn delete_user(&self, user: &User) -> Result<()> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_idempotency = self.cf_handle(CF_IDEMPOTENCY)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf_handle(CF_USERS)?, user.id.as_bytes());
        batch.delete_cf(cf_indices, Self::index_key_email(&user.email));

        let prefix = Self::index_key_user_idempotency(&user.email, None);
        let keys = self.scan_index_tails(&prefix)?;
        for key in &keys {
            batch.delete_cf(cf_idempotency, key);
            batch.delete_cf(
                cf_indices,
                Self::index_key_user_idempotency(&user.email, Some(key.as_slice())),
            );
        }

        self.write(batch)?;

        tracing::debug!(email = %user.email, purged_keys = keys.len(), "User records deleted");

        Ok(())
    }

    /// List all users in registration order
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.scan_all(CF_USERS)
    }

    // Ledger commits (atomic)

    /// Record deposit and updated bin weight (atomic)
    pub fn commit_deposit(&self, deposit: &DepositRequest, bin: &Bin) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Deposit record
        batch.put_cf(
            self.cf_handle(CF_DEPOSITS)?,
            deposit.id.as_bytes(),
            bincode::serialize(deposit)?,
        );

        // 2. Bin weight
        batch.put_cf(self.cf_handle(CF_BINS)?, bin.id.as_bytes(), bincode::serialize(bin)?);

        // 3. Index: bin_id || deposit_id -> empty
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            Self::index_key_bin_deposit(deposit.bin_id, Some(deposit.id)),
            b"",
        );

        self.write(batch)?;

        tracing::debug!(deposit_id = %deposit.id, bin_id = %bin.id, "Deposit committed");

        Ok(())
    }

    /// Record reward and debited/credited user (atomic)
    pub fn commit_redemption(&self, user: &User, reward: &Reward) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. User balances
        batch.put_cf(
            self.cf_handle(CF_USERS)?,
            user.id.as_bytes(),
            bincode::serialize(user)?,
        );

        // 2. Reward record
        batch.put_cf(
            self.cf_handle(CF_REWARDS)?,
            reward.id.as_bytes(),
            bincode::serialize(reward)?,
        );

        // 3. Index: email || reward_id -> empty
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            Self::index_key_user_reward(&reward.user_email, Some(reward.id)),
            b"",
        );

        self.write(batch)?;

        tracing::debug!(reward_id = %reward.id, email = %user.email, "Redemption committed");

        Ok(())
    }

    /// Record new point balance, and the idempotency outcome if keyed (atomic)
    pub fn commit_points(
        &self,
        user: &User,
        idempotency: Option<(&str, &IdempotencyRecord)>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        batch.put_cf(
            self.cf_handle(CF_USERS)?,
            user.id.as_bytes(),
            bincode::serialize(user)?,
        );

        if let Some((key, record)) = idempotency {
            batch.put_cf(
                self.cf_handle(CF_IDEMPOTENCY)?,
                key.as_bytes(),
                bincode::serialize(record)?,
            );
            batch.put_cf(
                self.cf_handle(CF_INDICES)?,
                Self::index_key_user_idempotency(&user.email, Some(key.as_bytes())),
                b"",
            );
        }

        self.write(batch)?;

        tracing::debug!(email = %user.email, points = user.points, "Points committed");

        Ok(())
    }

    /// Get stored outcome of a keyed grant
    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.get_value(CF_IDEMPOTENCY, key.as_bytes())
    }

    // History reads

    /// List all deposits in creation order
    pub fn list_deposits(&self) -> Result<Vec<DepositRequest>> {
        self.scan_all(CF_DEPOSITS)
    }

    /// List deposits for one bin (via index)
    pub fn list_bin_deposits(&self, bin_id: Uuid) -> Result<Vec<DepositRequest>> {
        let prefix = Self::index_key_bin_deposit(bin_id, None);
        self.scan_index_ids(&prefix)?
            .into_iter()
            .map(|id| {
                self.get_value(CF_DEPOSITS, id.as_bytes())?
                    .ok_or_else(|| Error::StorageUnavailable(format!("Dangling deposit index {}", id)))
            })
            .collect()
    }

    /// List all rewards in creation order
    pub fn list_rewards(&self) -> Result<Vec<Reward>> {
        self.scan_all(CF_REWARDS)
    }

    /// List rewards for one user (via index)
    pub fn list_user_rewards(&self, email: &Email) -> Result<Vec<Reward>> {
        let prefix = Self::index_key_user_reward(email, None);
        self.scan_index_ids(&prefix)?
            .into_iter()
            .map(|id| {
                self.get_value(CF_REWARDS, id.as_bytes())?
                    .ok_or_else(|| Error::StorageUnavailable(format!("Dangling reward index {}", id)))
            })
            .collect()
    }

    // Index key helpers

    fn index_key_email(email: &Email) -> Vec<u8> {
        let mut key = vec![IDX_EMAIL];
        key.extend_from_slice(email.as_str().as_bytes());
        key
    }

    fn index_key_bin_deposit(bin_id: Uuid, deposit_id: Option<Uuid>) -> Vec<u8> {
        let mut key = vec![IDX_BIN_DEPOSIT];
        key.extend_from_slice(bin_id.as_bytes());
        if let Some(id) = deposit_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_user_reward(email: &Email, reward_id: Option<Uuid>) -> Vec<u8> {
        let mut key = Self::user_prefix(IDX_USER_REWARD, email);
        if let Some(id) = reward_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_user_idempotency(email: &Email, idempotency_key: Option<&[u8]>) -> Vec<u8> {
        let mut key = Self::user_prefix(IDX_USER_IDEMPOTENCY, email);
        if let Some(k) = idempotency_key {
            key.extend_from_slice(k);
        }
        key
    }

    fn user_prefix(tag: u8, email: &Email) -> Vec<u8> {
        // Length prefix keeps one email from being a prefix of another
        let email_bytes = email.as_str().as_bytes();
        let mut key = vec![tag];
        key.extend_from_slice(&(email_bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(email_bytes);
        key
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_bins: self.approximate_count(CF_BINS)?,
            total_users: self.approximate_count(CF_USERS)?,
            total_deposits: self.approximate_count(CF_DEPOSITS)?,
            total_rewards: self.approximate_count(CF_REWARDS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

/// Storage statistics (approximate)
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    /// Bins
    pub total_bins: u64,
    /// Users
    pub total_users: u64,
    /// Deposit records
    pub total_deposits: u64,
    /// Reward records
    pub total_rewards: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_BINS).is_some());
        assert!(storage.db.cf_handle(CF_IDEMPOTENCY).is_some());
    }

    #[test]
    fn test_bin_roundtrip_and_delete() {
        let (storage, _temp) = test_storage();

        let bin = Bin::new(Decimal::from(50), Decimal::ZERO);
        storage.put_bin(&bin).unwrap();
        assert_eq!(storage.get_bin(bin.id).unwrap(), Some(bin.clone()));

        storage.delete_bin(bin.id).unwrap();
        assert_eq!(storage.get_bin(bin.id).unwrap(), None);
    }

    #[test]
    fn test_user_email_index() {
        let (storage, _temp) = test_storage();

        let user = User::new(email("alice@example.com"), "pw").unwrap();
        storage.insert_user(&user).unwrap();

        let found = storage.get_user_by_email(&user.email).unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(storage
            .get_user_by_email(&email("bob@example.com"))
            .unwrap()
            .is_none());

        storage.delete_user(&user).unwrap();
        assert!(storage.get_user_by_email(&user.email).unwrap().is_none());
        assert!(storage.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_commit_deposit_is_indexed() {
        let (storage, _temp) = test_storage();

        let mut bin = Bin::new(Decimal::from(100), Decimal::ZERO);
        let other = Bin::new(Decimal::from(100), Decimal::ZERO);
        storage.put_bin(&bin).unwrap();
        storage.put_bin(&other).unwrap();

        for _ in 0..3 {
            let deposit = DepositRequest::new(bin.id, Decimal::from(2));
            bin.current_weight += deposit.weight;
            storage.commit_deposit(&deposit, &bin).unwrap();
        }
        let stray = DepositRequest::new(other.id, Decimal::from(1));
        storage.commit_deposit(&stray, &other).unwrap();

        assert_eq!(storage.list_deposits().unwrap().len(), 4);

        let for_bin = storage.list_bin_deposits(bin.id).unwrap();
        assert_eq!(for_bin.len(), 3);
        assert!(for_bin.iter().all(|d| d.bin_id == bin.id));

        let stored = storage.get_bin(bin.id).unwrap().unwrap();
        assert_eq!(stored.current_weight, Decimal::from(6));
    }

    #[test]
    fn test_user_reward_index_does_not_bleed_between_prefixed_emails() {
        let (storage, _temp) = test_storage();

        let short = User::new(email("al@example.com"), "pw").unwrap();
        let long = User::new(email("al@example.com.au"), "pw").unwrap();
        storage.insert_user(&short).unwrap();
        storage.insert_user(&long).unwrap();

        storage
            .commit_redemption(&short, &Reward::new(short.email.clone(), 0, Decimal::ONE))
            .unwrap();
        storage
            .commit_redemption(&long, &Reward::new(long.email.clone(), 0, Decimal::ONE))
            .unwrap();

        assert_eq!(storage.list_user_rewards(&short.email).unwrap().len(), 1);
        assert_eq!(storage.list_user_rewards(&long.email).unwrap().len(), 1);
        assert_eq!(storage.list_rewards().unwrap().len(), 2);
    }

    #[test]
    fn test_commit_points_with_idempotency_record() {
        let (storage, _temp) = test_storage();

        let mut user = User::new(email("carol@example.com"), "pw").unwrap();
        storage.insert_user(&user).unwrap();

        user.points = 25;
        let record = IdempotencyRecord {
            email: user.email.clone(),
            points: 25,
            balance: 25,
        };
        storage.commit_points(&user, Some(("grant-1", &record))).unwrap();

        assert_eq!(storage.get_idempotency("grant-1").unwrap(), Some(record));
        assert_eq!(storage.get_idempotency("grant-2").unwrap(), None);
        assert_eq!(
            storage.get_user_by_email(&user.email).unwrap().unwrap().points,
            25
        );
    }

    #[test]
    fn test_delete_user_purges_only_its_idempotency_records() {
        let (storage, _temp) = test_storage();

        let mut al = User::new(email("al@example.com"), "pw").unwrap();
        let mut other = User::new(email("al@example.com.au"), "pw").unwrap();
        storage.insert_user(&al).unwrap();
        storage.insert_user(&other).unwrap();

        al.points = 5;
        let al_record = IdempotencyRecord {
            email: al.email.clone(),
            points: 5,
            balance: 5,
        };
        storage.commit_points(&al, Some(("al-1", &al_record))).unwrap();
        storage.commit_points(&al, Some(("al-2", &al_record))).unwrap();

        other.points = 7;
        let other_record = IdempotencyRecord {
            email: other.email.clone(),
            points: 7,
            balance: 7,
        };
        storage
            .commit_points(&other, Some(("other-1", &other_record)))
            .unwrap();

        storage.delete_user(&al).unwrap();

        assert_eq!(storage.get_idempotency("al-1").unwrap(), None);
        assert_eq!(storage.get_idempotency("al-2").unwrap(), None);
        assert_eq!(
            storage.get_idempotency("other-1").unwrap(),
            Some(other_record)
        );
        let prefix = Storage::index_key_user_idempotency(&al.email, None);
        assert!(storage.scan_index_tails(&prefix).unwrap().is_empty());
    }
}
