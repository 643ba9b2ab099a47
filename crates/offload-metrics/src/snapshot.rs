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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time statistics for a worker pool.
///
/// `active_workers <= total_workers` always holds, and
/// `tasks_completed + tasks_failed` never decreases over the pool's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Live worker slots (idle or busy).
    pub total_workers: usize,
    /// Slots currently running a task.
    pub active_workers: usize,
    /// Tasks waiting for an idle worker.
    pub queue_length: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Mean dispatch-to-completion time of successful tasks, in milliseconds.
    pub average_task_duration_ms: f64,
}

impl PoolStats {
    /// Tasks that have reached a terminal state.
    pub fn tasks_settled(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    pub fn idle_workers(&self) -> usize {
        self.total_workers.saturating_sub(self.active_workers)
    }
}

/// Metrics for a single registered function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub pool: PoolStats,
    pub functions: BTreeMap<String, FunctionMetrics>,
}
