//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify:
//! - Deposit accounting: weight grows by exactly the deposited amount
//! - Capacity: accepted deposits never push a bin past capacity
//! - Redemption: succeeds iff the balance covers it, debits/credits exactly
//! - Balance safety: no sequence of operations drives points negative
//! - Round-trip: every returned reward is listed afterwards

use proptest::prelude::*;
use rust_decimal::Decimal;
use tempfile::TempDir;
use wastebin_ledger::{Config, Error, ErrorKind, Ledger};

const EMAIL: &str = "prop@example.com";

/// Strategy for generating positive weights (two decimal places)
fn weight_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

/// Strategy for generating non-negative reward amounts
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

#[derive(Debug, Clone)]
enum PointsOp {
    Grant(u64),
    Debit(u64),
    Redeem(u64, Decimal),
}

/// Strategy for generating balance-affecting operations
fn points_op_strategy() -> impl Strategy<Value = PointsOp> {
    prop_oneof![
        (1u64..500).prop_map(PointsOp::Grant),
        (1u64..500).prop_map(PointsOp::Debit),
        (0u64..500, amount_strategy()).prop_map(|(p, a)| PointsOp::Redeem(p, a)),
    ]
}

/// Create test ledger with temp directory
async fn create_test_ledger(enforce_capacity: bool) -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;
    config.ledger.enforce_capacity = enforce_capacity;

    (Ledger::open(config).await.unwrap(), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: each deposit adds exactly its weight and one record
    #[test]
    fn prop_deposits_accumulate_exactly(
        initial in weight_strategy(),
        weights in prop::collection::vec(weight_strategy(), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger(false).await;
            let bin = ledger.create_bin(Decimal::from(1_000), initial).await.unwrap();

            let mut expected = initial;
            for weight in &weights {
                let updated = ledger.record_deposit(bin.id, *weight).await.unwrap();
                expected += *weight;
                prop_assert_eq!(updated.current_weight, expected);
            }

            let deposits = ledger.list_bin_deposits(bin.id).await.unwrap();
            prop_assert_eq!(deposits.len(), weights.len());
            prop_assert!(deposits.iter().all(|d| d.bin_id == bin.id && d.is_approved));

            let recorded: Vec<Decimal> = deposits.iter().map(|d| d.weight).collect();
            prop_assert_eq!(recorded, weights);
            Ok(())
        })?;
    }

    /// Property: with enforcement, accepted deposits never exceed capacity
    #[test]
    fn prop_capacity_never_exceeded(
        capacity in weight_strategy(),
        weights in prop::collection::vec(weight_strategy(), 1..30),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger(true).await;
            let bin = ledger.create_bin(capacity, Decimal::ZERO).await.unwrap();

            let mut accepted = Decimal::ZERO;
            for weight in weights {
                match ledger.record_deposit(bin.id, weight).await {
                    Ok(updated) => {
                        accepted += weight;
                        prop_assert_eq!(updated.current_weight, accepted);
                    }
                    Err(e) => {
                        prop_assert_eq!(e.kind(), ErrorKind::CapacityExceeded);
                        prop_assert!(accepted + weight > capacity);
                    }
                }
            }

            let stored = ledger.get_bin(bin.id).await.unwrap();
            prop_assert!(stored.current_weight <= capacity);
            prop_assert_eq!(stored.current_weight, accepted);

            let deposited: Decimal = ledger
                .list_deposits()
                .await
                .unwrap()
                .iter()
                .map(|d| d.weight)
                .sum();
            prop_assert_eq!(deposited, accepted);
            Ok(())
        })?;
    }

    /// Property: redeem succeeds iff points >= required, with exact effects
    #[test]
    fn prop_redeem_iff_balance_covers(
        balance in 1u64..1_000,
        required in 0u64..1_500,
        amount in amount_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger(true).await;
            ledger.register_user(EMAIL, "pw").await.unwrap();
            ledger.grant_points(EMAIL, balance, None).await.unwrap();

            let result = ledger.redeem(EMAIL, required, amount).await;
            let user = ledger.get_user(EMAIL).await.unwrap();
            let rewards = ledger.list_rewards().await.unwrap();

            if balance >= required {
                let reward = result.unwrap();
                prop_assert_eq!(user.points, balance - required);
                prop_assert_eq!(user.amount, amount);
                prop_assert_eq!(rewards, vec![reward]);
            } else {
                let is_insufficient = matches!(result, Err(Error::InsufficientBalance { .. }));
                prop_assert!(is_insufficient);
                prop_assert_eq!(user.points, balance);
                prop_assert_eq!(user.amount, Decimal::ZERO);
                prop_assert!(rewards.is_empty());
            }
            Ok(())
        })?;
    }

    /// Property: grant then get returns previous balance plus the grant
    #[test]
    fn prop_grant_then_get(grants in prop::collection::vec(1u64..10_000, 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger(true).await;
            ledger.register_user(EMAIL, "pw").await.unwrap();

            for points in grants {
                let before = ledger.get_points(EMAIL).await.unwrap();
                let granted = ledger.grant_points(EMAIL, points, None).await.unwrap();
                prop_assert_eq!(granted.balance, before + points);
                prop_assert_eq!(ledger.get_points(EMAIL).await.unwrap(), before + points);
            }
            Ok(())
        })?;
    }

    /// Property: balance tracks a simple model and every reward is listed
    #[test]
    fn prop_balance_matches_model(ops in prop::collection::vec(points_op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger(true).await;
            ledger.register_user(EMAIL, "pw").await.unwrap();

            let mut points = 0u64;
            let mut amount = Decimal::ZERO;
            let mut redeemed = Vec::new();

            for op in ops {
                match op {
                    PointsOp::Grant(p) => {
                        ledger.grant_points(EMAIL, p, None).await.unwrap();
                        points += p;
                    }
                    PointsOp::Debit(p) => match ledger.debit_points(EMAIL, p).await {
                        Ok(balance) => {
                            points -= p;
                            prop_assert_eq!(balance.balance, points);
                        }
                        Err(e) => {
                            prop_assert_eq!(e.kind(), ErrorKind::InsufficientBalance);
                            prop_assert!(p > points);
                        }
                    },
                    PointsOp::Redeem(p, a) => match ledger.redeem(EMAIL, p, a).await {
                        Ok(reward) => {
                            points -= p;
                            amount += a;
                            redeemed.push(reward);
                        }
                        Err(e) => {
                            prop_assert_eq!(e.kind(), ErrorKind::InsufficientBalance);
                            prop_assert!(p > points);
                        }
                    },
                }
            }

            let user = ledger.get_user(EMAIL).await.unwrap();
            prop_assert_eq!(user.points, points);
            prop_assert_eq!(user.amount, amount);

            let listed = ledger.list_rewards().await.unwrap();
            prop_assert_eq!(&listed, &redeemed);
            prop_assert_eq!(ledger.list_user_rewards(EMAIL).await.unwrap(), redeemed);
            Ok(())
        })?;
    }
}
