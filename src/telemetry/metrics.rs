// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for performance monitoring.
//!
//! Provides lightweight metrics collection without external dependencies.
//! Suitable for embedded tooling where full observability stacks are overkill.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Operation metrics by name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record an operation's duration.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap();
        let metrics = ops
            .entry(name.to_string())
            .or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().unwrap().get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all operation metrics.
    pub fn snapshot(&self) -> HashMap<String, OperationMetrics> {
        self.operations.read().unwrap().clone()
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.operations.write().unwrap().clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Total number of invocations.
    pub invocations: u64,

    /// Total time spent.
    pub total_duration: Duration,

    /// Slowest observed invocation.
    pub max_duration: Duration,
}

impl OperationMetrics {
    fn new() -> Self {
        Self {
            invocations: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }

    fn record(&mut self, duration: Duration) {
        self.invocations += 1;
        self.total_duration += duration;
        if duration > self.max_duration {
            self.max_duration = duration;
        }
    }

    /// Mean duration across invocations.
    pub fn average(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }
}
