//! Metrics collection and export module

use crate::tx_builder::errors::Stage;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Orchestrator metrics
pub struct Metrics {
    registry: Registry,

    // Counters
    pub transactions_submitted: IntCounter,
    pub transactions_confirmed: IntCounter,
    pub transactions_failed: IntCounterVec,

    // Gauges
    pub withheld_accounts: IntGauge,

    // Histograms
    pub submission_latency: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transactions_submitted = IntCounter::with_opts(Opts::new(
            "token_forge_transactions_submitted_total",
            "Transactions handed to the ledger",
        ))?;

        let transactions_confirmed = IntCounter::with_opts(Opts::new(
            "token_forge_transactions_confirmed_total",
            "Transactions the ledger confirmed",
        ))?;

        let transactions_failed = IntCounterVec::new(
            Opts::new(
                "token_forge_transactions_failed_total",
                "Failed operations by pipeline stage",
            ),
            &["stage"],
        )?;

        let withheld_accounts = IntGauge::with_opts(Opts::new(
            "token_forge_withheld_accounts",
            "Accounts holding withheld fees on the last scan",
        ))?;

        let submission_latency = Histogram::with_opts(
            HistogramOpts::new(
                "token_forge_submission_latency_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(transactions_submitted.clone()))?;
        registry.register(Box::new(transactions_confirmed.clone()))?;
        registry.register(Box::new(transactions_failed.clone()))?;
        registry.register(Box::new(withheld_accounts.clone()))?;
        registry.register(Box::new(submission_latency.clone()))?;

        Ok(Self {
            registry,
            transactions_submitted,
            transactions_confirmed,
            transactions_failed,
            withheld_accounts,
            submission_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, stage: Stage) {
        self.transactions_failed
            .with_label_values(&[stage.as_str()])
            .inc();
    }

    /// Registry contents in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_failure_label() {
        let m = Metrics::new().unwrap();
        m.transactions_submitted.inc();
        m.record_failure(Stage::FeeCheck);
        m.withheld_accounts.set(3);
        let text = m.render().unwrap();
        assert!(text.contains("token_forge_transactions_submitted_total 1"));
        assert!(text.contains("stage=\"fee check\""));
        assert!(text.contains("token_forge_withheld_accounts 3"));
    }

    #[test]
    fn test_timer_records() {
        let m = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&m.submission_latency);
        assert_eq!(m.submission_latency.get_sample_count(), 1);
    }
}
