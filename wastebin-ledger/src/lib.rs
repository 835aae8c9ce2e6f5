//! Wastebin Ledger
//!
//! Deposit, points and reward ledger for smart waste bins.
//!
//! # Architecture
//!
//! - **Entity Store**: RocksDB column families for bins, users, deposits, rewards
//! - **Per-entity locks**: one lock per bin or user, no global writer
//! - **Atomic commits**: every mutation is a single `WriteBatch`
//!
//! # Invariants
//!
//! - A bin's weight grows by exactly the deposited weight, with one deposit record
//! - Points never go negative; a redemption succeeds iff the balance covers it
//! - A failed operation leaves no partial state behind

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{Bin, DepositRequest, Email, PointsBalance, Reward, User};
