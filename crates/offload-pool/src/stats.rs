//! Periodic stats subscription.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use offload_metrics::PoolStats;
use tokio::time::{Interval, MissedTickBehavior};

use crate::pool::Shared;

/// A stream of [`PoolStats`] snapshots, one per tick.
///
/// Lazy: the timer starts on first poll, and the first snapshot is immediate.
/// No background task is involved, so dropping the stream stops it. The
/// stream only ends once the pool itself has been dropped.
#[derive(Debug)]
pub struct StatsStream {
    period: Duration,
    interval: Option<Interval>,
    pool: Weak<Shared>,
}

impl StatsStream {
    pub(crate) fn new(period: Duration, pool: Weak<Shared>) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            interval: None,
            pool,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Restarts the timer: the next poll yields immediately.
    pub fn restart(&mut self) {
        self.interval = None;
    }
}

impl Stream for StatsStream {
    type Item = PoolStats;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.pool.strong_count() == 0 {
            return Poll::Ready(None);
        }

        let period = this.period;
        let interval = this.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        if interval.poll_tick(cx).is_pending() {
            return Poll::Pending;
        }

        match this.pool.upgrade() {
            Some(pool) => Poll::Ready(Some(pool.stats())),
            None => Poll::Ready(None),
        }
    }
}
