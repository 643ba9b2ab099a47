// Copyright 2025 Offload Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Offload Metrics
//!
//! Statistics types reported by the worker pool, plus the per-function
//! latency registry that feeds [`MetricsSnapshot`].
//!
//! - [`PoolStats`]: the pool-level counters (`totalWorkers`, `queueLength`, ...)
//! - [`FunctionMetricsRegistry`]: lock-free per-function call counters and
//!   latency percentiles
//! - [`MetricsSnapshot`]: serializable combination of both
//!
//! # Usage Example
//!
//! ```rust
//! use offload_metrics::{FunctionMetricsRegistry, MetricsSnapshot, PoolStats};
//! use std::time::Instant;
//!
//! let registry = FunctionMetricsRegistry::new();
//! let started = Instant::now();
//! // ... run the task ...
//! registry.record_since("double", started, true);
//!
//! let snapshot = MetricsSnapshot {
//!     uptime_ms: registry.uptime_ms(),
//!     pool: PoolStats::default(),
//!     functions: registry.snapshot(),
//! };
//! assert_eq!(snapshot.functions["double"].success_count, 1);
//! ```
//!
//! # Thread Safety
//!
//! The registry can be shared across threads behind an `Arc`. Counter updates
//! are atomics; the function map takes a write lock only the first time a name
//! is recorded.

mod histogram;
mod registry;
mod snapshot;

pub use histogram::LatencyHistogram;
pub use registry::FunctionMetricsRegistry;
pub use snapshot::{FunctionMetrics, MetricsSnapshot, PoolStats};
