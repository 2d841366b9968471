//! Metrics collection for observability
//!
//! Prometheus metrics on a private registry, so several ledgers (e.g. in
//! tests) can coexist in one process.
//!
//! # Metrics
//!
//! - `escrow_streams_created_total` - Streams created
//! - `escrow_withdrawals_total` - Successful withdrawals
//! - `escrow_cancellations_total` - Successful cancellations
//! - `escrow_transfer_failures_total` - Payouts rejected by the sink
//! - `escrow_locked_amount` - Value in custody (lossy, for dashboards only)

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Streams created
    pub streams_created: IntCounter,

    /// Successful withdrawals
    pub withdrawals: IntCounter,

    /// Successful cancellations
    pub cancellations: IntCounter,

    /// Rejected payouts
    pub transfer_failures: IntCounter,

    /// Value in custody
    pub locked_amount: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("streams_created", &self.streams_created.get())
            .field("withdrawals", &self.withdrawals.get())
            .field("cancellations", &self.cancellations.get())
            .field("transfer_failures", &self.transfer_failures.get())
            .field("locked_amount", &self.locked_amount.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let streams_created =
            IntCounter::new("escrow_streams_created_total", "Streams created")?;
        registry.register(Box::new(streams_created.clone()))?;

        let withdrawals = IntCounter::new("escrow_withdrawals_total", "Successful withdrawals")?;
        registry.register(Box::new(withdrawals.clone()))?;

        let cancellations =
            IntCounter::new("escrow_cancellations_total", "Successful cancellations")?;
        registry.register(Box::new(cancellations.clone()))?;

        let transfer_failures = IntCounter::new(
            "escrow_transfer_failures_total",
            "Payouts rejected by the payout sink",
        )?;
        registry.register(Box::new(transfer_failures.clone()))?;

        let locked_amount = IntGauge::new("escrow_locked_amount", "Value in custody")?;
        registry.register(Box::new(locked_amount.clone()))?;

        Ok(Self {
            streams_created,
            withdrawals,
            cancellations,
            transfer_failures,
            locked_amount,
            registry,
        })
    }

    /// Record stream creation
    pub fn record_stream_created(&self) {
        self.streams_created.inc();
    }

    /// Record withdrawal
    pub fn record_withdrawal(&self) {
        self.withdrawals.inc();
    }

    /// Record cancellation
    pub fn record_cancellation(&self) {
        self.cancellations.inc();
    }

    /// Record rejected payout
    pub fn record_transfer_failure(&self) {
        self.transfer_failures.inc();
    }

    /// Update custody gauge, clamped to `i64::MAX`
    pub fn update_locked_amount(&self, amount: u128) {
        self.locked_amount
            .set(i64::try_from(amount).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.streams_created.get(), 0);
        assert_eq!(metrics.withdrawals.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_stream_created();
        assert_eq!(a.streams_created.get(), 1);
        assert_eq!(b.streams_created.get(), 0);
    }

    #[test]
    fn test_locked_amount_clamped() {
        let metrics = Metrics::new().unwrap();
        metrics.update_locked_amount(36 * 10u128.pow(18));
        assert_eq!(metrics.locked_amount.get(), i64::MAX);

        metrics.update_locked_amount(1_000);
        assert_eq!(metrics.locked_amount.get(), 1_000);
    }

    #[test]
    fn test_registry_gathers_all() {
        let metrics = Metrics::new().unwrap();
        metrics.record_withdrawal();
        metrics.record_cancellation();
        metrics.record_transfer_failure();
        assert_eq!(metrics.registry().gather().len(), 5);
    }

    #[test]
    fn test_debug_shows_counts() {
        let metrics = Metrics::new().unwrap();
        metrics.record_withdrawal();
        let text = format!("{:?}", metrics);
        assert!(text.contains("withdrawals: 1"));
    }
}
