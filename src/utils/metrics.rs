//! Running request counters for the request-shaping layer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::utils::Clock;

/// Snapshot of the collected metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_requests: u64,
    pub cached_requests: u64,
    pub debounced_requests: u64,
    pub context_optimizations: u64,
    /// `cached_requests / total_requests`, 0 when nothing was counted
    pub cache_hit_rate: f64,
    /// Mean latency in milliseconds over all recorded responses
    pub average_response_time: f64,
    /// Number of latencies folded into the mean
    pub response_samples: u64,
    /// Last mutation (epoch ms)
    pub last_updated: u64,
}

/// Thread-safe metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    metrics: Mutex<Metrics>,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            metrics: Mutex::new(Metrics::default()),
            clock,
        }
    }

    fn update(&self, f: impl FnOnce(&mut Metrics)) {
        let mut metrics = self.lock();
        f(&mut metrics);
        metrics.cache_hit_rate = if metrics.total_requests == 0 {
            0.0
        } else {
            metrics.cached_requests as f64 / metrics.total_requests as f64
        };
        metrics.last_updated = self.clock.now_ms();
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn increment_total_requests(&self) {
        self.update(|m| m.total_requests += 1);
    }

    pub fn increment_cached_requests(&self) {
        self.update(|m| m.cached_requests += 1);
    }

    pub fn increment_debounced_requests(&self) {
        self.update(|m| m.debounced_requests += 1);
    }

    pub fn increment_context_optimizations(&self) {
        self.update(|m| m.context_optimizations += 1);
    }

    /// Count a request served from the cache
    pub fn record_cache_hit(&self) {
        self.update(|m| {
            m.total_requests += 1;
            m.cached_requests += 1;
        });
    }

    /// Count a request that had to go to the network
    pub fn record_cache_miss(&self) {
        self.update(|m| m.total_requests += 1);
    }

    /// Fold one latency into the running mean
    pub fn update_average_response_time(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.update(|m| {
            m.response_samples += 1;
            let n = m.response_samples as f64;
            m.average_response_time = (m.average_response_time * (n - 1.0) + latency_ms) / n;
        });
    }

    pub fn snapshot(&self) -> Metrics {
        self.lock().clone()
    }

    pub fn reset_metrics(&self) {
        let now = self.clock.now_ms();
        let mut metrics = self.lock();
        *metrics = Metrics {
            last_updated: now,
            ..Metrics::default()
        };
    }
}
