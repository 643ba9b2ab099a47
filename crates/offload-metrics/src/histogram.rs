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

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const NUM_HISTOGRAM_BINS: usize = 100;

/// Logarithmic histogram for efficient percentile estimation.
///
/// Each decade of microseconds is split into bins by leading digit, so
/// bin `d * 10 + k` covers `[k * 10^d, (k + 1) * 10^d)`. Ten decades fit in
/// 100 bins (1μs up to ~2.7 hours); anything longer lands in the last bin.
///
/// # Performance
///
/// - Lock-free: every counter is an atomic
/// - O(1) recording
/// - O(bins) percentile estimation
/// - Constant memory regardless of sample count
///
/// # Accuracy
///
/// Percentiles are interpolated within a bin, so the estimate is within one
/// bin width (10% of the decade) of the true value.
#[derive(Debug)]
pub struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    /// Records a latency sample in microseconds.
    pub fn record(&self, latency_us: u64) {
        let bin = Self::latency_to_bin(latency_us);
        // Relaxed is enough: snapshots are best-effort and counters independent
        self.bins[bin].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.sample_count.load(Ordering::Relaxed)
    }

    pub fn average(&self) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        self.total_latency.load(Ordering::Relaxed) / total
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10();
        let leading = latency_us / 10u64.pow(decade);
        (decade as usize * 10 + leading as usize).min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower bound (inclusive) of a bin.
    fn bin_lower_bound(bin: usize) -> u64 {
        if bin == 0 {
            return 0;
        }
        let decade = (bin / 10) as u32;
        let leading = (bin % 10).max(1) as u64;
        10u64.pow(decade) * leading
    }

    /// Upper bound (exclusive) of a bin.
    fn bin_upper_bound(bin: usize) -> u64 {
        if bin == 0 {
            return 1;
        }
        let decade = (bin / 10) as u32;
        let leading = (bin % 10).max(1) as u64;
        10u64.pow(decade) * (leading + 1)
    }

    /// Estimates the value at a given percentile (0-100).
    ///
    /// Returns 0 when nothing has been recorded.
    pub fn percentile(&self, percentile: u64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile.min(100)).div_ceil(100)).max(1);
        let mut cumulative = 0;

        for (bin, counter) in self.bins.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            if cumulative + count >= target {
                let lower = Self::bin_lower_bound(bin);
                let upper = Self::bin_upper_bound(bin);
                let fraction = (target - cumulative) as f64 / count as f64;
                let estimate = lower as f64 + fraction * (upper - lower) as f64;
                return (estimate as u64).min(upper.saturating_sub(1)).max(lower);
            }
            cumulative += count;
        }

        Self::bin_lower_bound(NUM_HISTOGRAM_BINS - 1)
    }

    /// Returns `(avg, p50, p95, p99)` in microseconds.
    pub fn summary(&self) -> (u64, u64, u64, u64) {
        if self.count() == 0 {
            return (0, 0, 0, 0);
        }
        (
            self.average(),
            self.percentile(50),
            self.percentile(95),
            self.percentile(99),
        )
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
