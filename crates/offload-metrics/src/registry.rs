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

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::histogram::LatencyHistogram;
use crate::snapshot::FunctionMetrics;

/// Per-function counters.
#[derive(Debug, Default)]
struct FunctionStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
}

impl FunctionStats {
    fn record(&self, latency_us: u64, success: bool) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies.record(latency_us);
    }

    fn snapshot(&self) -> FunctionMetrics {
        let (avg_latency_us, p50_latency_us, p95_latency_us, p99_latency_us) =
            self.latencies.summary();

        FunctionMetrics {
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
        }
    }
}

/// Thread-safe registry of per-function metrics.
///
/// The map itself sits behind an `RwLock` that is only written when a function
/// is seen for the first time; the counters inside each entry are atomics.
///
/// # Example
///
/// ```rust
/// use offload_metrics::FunctionMetricsRegistry;
///
/// let registry = FunctionMetricsRegistry::new();
/// registry.record("double", 120, true);
/// registry.record("double", 80, false);
///
/// let metrics = registry.snapshot();
/// assert_eq!(metrics["double"].call_count, 2);
/// assert_eq!(metrics["double"].failure_count, 1);
/// ```
#[derive(Debug)]
pub struct FunctionMetricsRegistry {
    functions: RwLock<HashMap<String, Arc<FunctionStats>>>,
    start_time: Instant,
}

impl FunctionMetricsRegistry {
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Records one settled call of `function`.
    ///
    /// `latency_us` is the dispatch-to-settle time in microseconds.
    pub fn record(&self, function: &str, latency_us: u64, success: bool) {
        let existing = self
            .functions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(function)
            .cloned();

        let stats = match existing {
            Some(stats) => stats,
            None => {
                let mut functions = self.functions.write().unwrap_or_else(|e| e.into_inner());
                functions
                    .entry(function.to_string())
                    .or_insert_with(|| Arc::new(FunctionStats::default()))
                    .clone()
            }
        };

        stats.record(latency_us, success);
    }

    /// Convenience wrapper measuring latency from `started`.
    pub fn record_since(&self, function: &str, started: Instant, success: bool) {
        let latency_us = started.elapsed().as_micros() as u64;
        self.record(function, latency_us, success);
    }

    /// Per-function metrics, ordered by function name.
    pub fn snapshot(&self) -> BTreeMap<String, FunctionMetrics> {
        let functions = self.functions.read().unwrap_or_else(|e| e.into_inner());
        functions
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

impl Default for FunctionMetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_function_tracking() {
        let registry = FunctionMetricsRegistry::new();

        registry.record("fib", 100, true);
        registry.record("fib", 200, true);
        registry.record("fib", 50, false);

        let snapshot = registry.snapshot();
        let fib = snapshot.get("fib").unwrap();
        assert_eq!(fib.call_count, 3);
        assert_eq!(fib.success_count, 2);
        assert_eq!(fib.failure_count, 1);
        assert_eq!(fib.avg_latency_us, 116); // (100 + 200 + 50) / 3
    }

    #[test]
    fn test_unknown_function_absent() {
        let registry = FunctionMetricsRegistry::new();
        registry.record("a", 1, true);
        let snapshot = registry.snapshot();
        assert!(snapshot.get("b").is_none());
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_percentiles() {
        let registry = FunctionMetricsRegistry::new();
        for i in 1..=1000 {
            registry.record("spread", i, true);
        }

        let metrics = registry.snapshot().remove("spread").unwrap();
        assert!((400..=600).contains(&metrics.p50_latency_us));
        assert!((900..=1000).contains(&metrics.p95_latency_us));
        assert!(metrics.p99_latency_us >= metrics.p95_latency_us);
    }

    #[test]
    fn test_thread_safety() {
        let registry = Arc::new(FunctionMetricsRegistry::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    registry.record("concurrent", 100, true);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = registry.snapshot().remove("concurrent").unwrap();
        assert_eq!(metrics.call_count, 8000);
        assert_eq!(metrics.success_count, 8000);
    }

    #[test]
    fn test_uptime() {
        let registry = FunctionMetricsRegistry::new();
        thread::sleep(Duration::from_millis(10));
        assert!(registry.uptime_ms() >= 10);
    }
}
