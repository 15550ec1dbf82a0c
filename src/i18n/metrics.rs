//! Translation metrics and observability module.
//!
//! Process-wide counters for provider traffic and write-time validation,
//! exposed through `GET /metrics` and the end-of-job log lines.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Global translation metrics singleton.
pub struct TranslationMetrics {
    /// Batches sent to the translation provider (each attempt counts)
    provider_calls: AtomicUsize,

    /// Provider attempts that failed for any reason
    provider_failures: AtomicUsize,

    /// Provider attempts rejected with a rate-limit status
    rate_limited: AtomicUsize,

    /// Rows written by translation upserts
    rows_upserted: AtomicUsize,

    /// Provider entries dropped by the write-time guard
    entries_rejected: AtomicUsize,
}

static METRICS: OnceLock<TranslationMetrics> = OnceLock::new();

impl TranslationMetrics {
    fn new() -> Self {
        TranslationMetrics {
            provider_calls: AtomicUsize::new(0),
            provider_failures: AtomicUsize::new(0),
            rate_limited: AtomicUsize::new(0),
            rows_upserted: AtomicUsize::new(0),
            entries_rejected: AtomicUsize::new(0),
        }
    }

    pub fn global() -> &'static TranslationMetrics {
        METRICS.get_or_init(TranslationMetrics::new)
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_upserted(&self, count: usize) {
        self.rows_upserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_entries_rejected(&self, count: usize) {
        self.entries_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn provider_calls(&self) -> usize {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn provider_failures(&self) -> usize {
        self.provider_failures.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> usize {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn rows_upserted(&self) -> usize {
        self.rows_upserted.load(Ordering::Relaxed)
    }

    pub fn entries_rejected(&self) -> usize {
        self.entries_rejected.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let calls = self.provider_calls();
        let failures = self.provider_failures();
        let provider_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            provider_calls: calls,
            provider_failures: failures,
            provider_success_rate,
            rate_limited: self.rate_limited(),
            rows_upserted: self.rows_upserted(),
            entries_rejected: self.entries_rejected(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub provider_calls: usize,
    pub provider_failures: usize,
    pub provider_success_rate: f64,
    pub rate_limited: usize,
    pub rows_upserted: usize,
    pub entries_rejected: usize,
}

impl MetricsReport {
    pub fn format(&self) -> String {
        format!(
            "provider calls: {} ({} failed, {:.1}% ok, {} rate limited), rows upserted: {}, entries rejected: {}",
            self.provider_calls,
            self.provider_failures,
            self.provider_success_rate,
            self.rate_limited,
            self.rows_upserted,
            self.entries_rejected
        )
    }
}
