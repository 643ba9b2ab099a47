//! Plain-text rendering of pool stats and function metrics for `offload watch`.

use std::fmt::Write;

use offload_pool::{MetricsSnapshot, PoolStats};

/// Format a duration in milliseconds to a human-readable string
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{}s", ms / 1000)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// Format latency in microseconds to a human-readable string
pub fn format_latency_us(us: u64) -> String {
    if us == 0 {
        "-".to_string()
    } else if us < 1000 {
        format!("{}μs", us)
    } else if us < 1_000_000 {
        format!("{}ms", us / 1000)
    } else {
        format!("{:.1}s", us as f64 / 1_000_000.0)
    }
}

/// One status line per stats tick.
pub fn stats_line(stats: &PoolStats) -> String {
    format!(
        "workers {}/{} busy | queued {} | completed {} | failed {} | avg {:.1}ms",
        stats.active_workers,
        stats.total_workers,
        stats.queue_length,
        stats.tasks_completed,
        stats.tasks_failed,
        stats.average_task_duration_ms,
    )
}

/// Per-function table, busiest function first.
pub fn metrics_table(metrics: &MetricsSnapshot) -> String {
    let mut functions: Vec<_> = metrics.functions.iter().collect();
    functions.sort_by(|a, b| b.1.call_count.cmp(&a.1.call_count).then(a.0.cmp(b.0)));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Function", "Calls", "Success", "Failed", "P50", "P95", "P99"
    );
    for (name, m) in functions {
        let _ = writeln!(
            out,
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            name,
            m.call_count,
            m.success_count,
            m.failure_count,
            format_latency_us(m.p50_latency_us),
            format_latency_us(m.p95_latency_us),
            format_latency_us(m.p99_latency_us),
        );
    }
    let _ = write!(out, "uptime {}", format_duration_ms(metrics.uptime_ms));
    out
}
