//! Per-batch performance counters.

use quill_abstraction::ModelUsage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of a batch's request statistics.
///
/// Skipped rows are never counted as requests, so
/// `successful_requests + failed_requests == total_requests` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Rows that issued at least one upstream request.
    pub total_requests: u64,
    /// Requests whose row succeeded.
    pub successful_requests: u64,
    /// Requests whose row failed or errored.
    pub failed_requests: u64,
    /// Sum of per-row processing times.
    pub total_processing_time: Duration,
    /// Retries issued across all rows.
    pub retry_count: u64,
    /// `total_processing_time / total_requests`.
    pub average_processing_time: Duration,
    /// Success rate as a percentage (0.0 to 100.0).
    pub success_rate: f64,
    /// Prompt tokens reported by the upstream.
    pub prompt_tokens: u64,
    /// Completion tokens reported by the upstream.
    pub completion_tokens: u64,
}

impl PerformanceStats {
    fn from_counters(
        total: u64,
        successful: u64,
        failed: u64,
        processing: Duration,
        retries: u64,
        tokens: (u64, u64),
    ) -> Self {
        let average_processing_time = if total > 0 {
            Duration::from_nanos((processing.as_nanos() / u128::from(total)) as u64)
        } else {
            Duration::ZERO
        };
        let success_rate = if total > 0 { successful as f64 / total as f64 * 100.0 } else { 0.0 };

        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            total_processing_time: processing,
            retry_count: retries,
            average_processing_time,
            success_rate,
            prompt_tokens: tokens.0,
            completion_tokens: tokens.1,
        }
    }

    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Aggregate the statistics of two jobs.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self::from_counters(
            self.total_requests + other.total_requests,
            self.successful_requests + other.successful_requests,
            self.failed_requests + other.failed_requests,
            self.total_processing_time + other.total_processing_time,
            self.retry_count + other.retry_count,
            (self.prompt_tokens + other.prompt_tokens, self.completion_tokens + other.completion_tokens),
        )
    }
}

/// Running counters for one batch job.
///
/// Updated concurrently by row tasks; all counters are atomics.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    processing_nanos: AtomicU64,
    retry_count: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl PerformanceMonitor {
    /// Create a monitor with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request, including any retries it needed.
    pub fn record(&self, success: bool, processing_time: Duration, retries: u64) {
        self.record_request(success, processing_time);
        if retries > 0 {
            self.retry_count.fetch_add(retries, Ordering::Relaxed);
        }
    }

    /// Record one completed request whose retries were already counted live.
    pub fn record_request(&self, success: bool, processing_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(processing_time.as_nanos()).unwrap_or(u64::MAX);
        self.processing_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Count one retry.
    pub fn record_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Add the token usage of one upstream reply.
    pub fn record_usage(&self, usage: &ModelUsage) {
        self.prompt_tokens.fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.completion_tokens.fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
    }

    /// Current statistics.
    pub fn stats(&self) -> PerformanceStats {
        PerformanceStats::from_counters(
            self.total_requests.load(Ordering::Relaxed),
            self.successful_requests.load(Ordering::Relaxed),
            self.failed_requests.load(Ordering::Relaxed),
            Duration::from_nanos(self.processing_nanos.load(Ordering::Relaxed)),
            self.retry_count.load(Ordering::Relaxed),
            (self.prompt_tokens.load(Ordering::Relaxed), self.completion_tokens.load(Ordering::Relaxed)),
        )
    }

    /// Alias of [`stats`](Self::stats).
    pub fn get_stats(&self) -> PerformanceStats {
        self.stats()
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.processing_nanos.store(0, Ordering::Relaxed);
        self.retry_count.store(0, Ordering::Relaxed);
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
    }
}
