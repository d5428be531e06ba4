// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging with `tracing`, initialized once at
//!   startup via [`init_telemetry`]
//! - **Metrics**: lightweight operation timings behind the `telemetry`
//!   feature, recorded through [`metrics::GLOBAL_METRICS`]

pub mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig};
pub use metrics::{Metrics, OperationMetrics, GLOBAL_METRICS};
