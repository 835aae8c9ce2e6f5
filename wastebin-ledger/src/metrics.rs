//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_deposits_total` - Deposits recorded
//! - `ledger_deposit_weight` - Histogram of deposited weights
//! - `ledger_points_granted_total` - Points credited by grants
//! - `ledger_points_debited_total` - Points removed by debits and redemptions
//! - `ledger_redemptions_total` - Successful redemptions
//! - `ledger_rejections_total` - Ledger operations rejected, by reason
//! - `ledger_operation_duration_seconds` - Histogram of mutation latencies

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ErrorKind;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Deposits recorded
    pub deposits_total: IntCounter,

    /// Deposited weight histogram
    pub deposit_weight: Histogram,

    /// Points credited by grants
    pub points_granted: IntCounter,

    /// Points removed by debits and redemptions
    pub points_debited: IntCounter,

    /// Successful redemptions
    pub redemptions_total: IntCounter,

    /// Rejected operations by reason
    pub rejections: IntCounterVec,

    /// Mutation latency histogram
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    ///
    /// Every exported series carries `service` and `version` labels.
    pub fn new(service_name: &str, service_version: &str) -> prometheus::Result<Self> {
        let labels = HashMap::from([
            ("service".to_string(), service_name.to_string()),
            ("version".to_string(), service_version.to_string()),
        ]);
        let registry = Arc::new(Registry::new_custom(None, Some(labels))?);

        let deposits_total = IntCounter::new("ledger_deposits_total", "Deposits recorded")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let deposit_weight = Histogram::with_opts(
            HistogramOpts::new("ledger_deposit_weight", "Histogram of deposited weights")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(deposit_weight.clone()))?;

        let points_granted =
            IntCounter::new("ledger_points_granted_total", "Points credited by grants")?;
        registry.register(Box::new(points_granted.clone()))?;

        let points_debited = IntCounter::new(
            "ledger_points_debited_total",
            "Points removed by debits and redemptions",
        )?;
        registry.register(Box::new(points_debited.clone()))?;

        let redemptions_total =
            IntCounter::new("ledger_redemptions_total", "Successful redemptions")?;
        registry.register(Box::new(redemptions_total.clone()))?;

        let rejections = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Ledger operations rejected"),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            deposits_total,
            deposit_weight,
            points_granted,
            points_debited,
            redemptions_total,
            rejections,
            operation_duration,
            registry,
        })
    }

    /// Record a committed deposit
    pub fn record_deposit(&self, weight: f64) {
        self.deposits_total.inc();
        self.deposit_weight.observe(weight);
    }

    /// Record a committed grant
    pub fn record_grant(&self, points: u64) {
        self.points_granted.inc_by(points);
    }

    /// Record a committed debit
    pub fn record_debit(&self, points: u64) {
        self.points_debited.inc_by(points);
    }

    /// Record a committed redemption
    pub fn record_redemption(&self, points: u64) {
        self.redemptions_total.inc();
        self.points_debited.inc_by(points);
    }

    /// Record a rejected operation
    pub fn record_rejection(&self, operation: &str, kind: ErrorKind) {
        self.rejections
            .with_label_values(&[operation, reason_label(kind)])
            .inc();
    }

    /// Record mutation duration
    pub fn record_duration(&self, duration_seconds: f64) {
        self.operation_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("deposits_total", &self.deposits_total.get())
            .field("redemptions_total", &self.redemptions_total.get())
            .finish_non_exhaustive()
    }
}

fn reason_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::InsufficientBalance => "insufficient_balance",
        ErrorKind::CapacityExceeded => "capacity_exceeded",
        ErrorKind::Conflict => "conflict",
        ErrorKind::StorageUnavailable => "storage_unavailable",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::Internal => "internal",
    }
}
