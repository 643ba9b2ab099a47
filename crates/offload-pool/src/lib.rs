//! Offload Worker Pool
//!
//! Runs registered JavaScript functions on a bounded pool of worker threads.
//!
//! # Architecture
//!
//! - [`FunctionRegistry`] - registered functions, versioned
//! - [`TaskQueue`] - pending tasks, FIFO or by priority
//! - [`WorkerPool`] - owns the worker slots, dispatches tasks, tracks outcomes
//! - [`TaskHandle`] - a future for one task's result, with cancellation
//! - [`StatsStream`] - periodic [`PoolStats`] snapshots
//!
//! All bookkeeping happens under a single mutex, driven either by callers
//! (`submit`, `cancel`, `register`) or by one event-loop task that consumes
//! worker replies, faults and timers. Every observer therefore sees whole
//! state transitions.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use offload_common::PoolConfig;
//! use offload_pool::WorkerPool;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> offload_common::Result<()> {
//! let pool = WorkerPool::new(PoolConfig::default().with_max_workers(2))?;
//! pool.register("double", "x => x * 2", vec![])?;
//!
//! let handle = pool.submit("double", vec![json!(21)])?;
//! assert_eq!(handle.await?, json!(42));
//!
//! let mut stats = pool.subscribe_stats(Duration::from_millis(500));
//! if let Some(snapshot) = stats.next().await {
//!     println!("{} tasks completed", snapshot.tasks_completed);
//! }
//! # Ok(())
//! # }
//! ```

mod handle;
mod pool;
pub mod queue;
pub mod registry;
pub mod state;
mod stats;

pub use handle::TaskHandle;
pub use offload_metrics::{FunctionMetrics, MetricsSnapshot, PoolStats};
pub use pool::WorkerPool;
pub use queue::{Task, TaskQueue};
pub use registry::{FunctionEntry, FunctionRegistry};
pub use state::{SlotId, SlotStatus, WorkerSlotInfo};
pub use stats::StatsStream;
