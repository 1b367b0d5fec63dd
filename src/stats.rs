//! I/O statistics shared by concurrently running plans
//!
//! Collection is bracketed: the first `start_collecting` resets the counters
//! and starts the clock, and only the `stop_collecting` that brings the
//! number of running plans back to zero produces a report.

use crate::utils::format_bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Atomic byte and operation counters for one I/O channel
#[derive(Debug, Default)]
pub struct IoCounters {
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    operations: AtomicU64,
}

impl IoCounters {
    /// Account one read of `bytes`
    pub fn record_read(&self, bytes: u64) {
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one write of `bytes`
    pub fn record_write(&self, bytes: u64) {
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoSnapshot {
        IoSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
        }
    }

    /// Read the counters and zero them
    fn drain(&self) -> IoSnapshot {
        IoSnapshot {
            read_bytes: self.read_bytes.swap(0, Ordering::Relaxed),
            write_bytes: self.write_bytes.swap(0, Ordering::Relaxed),
            operations: self.operations.swap(0, Ordering::Relaxed),
        }
    }
}

/// Point-in-time value of an [`IoCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoSnapshot {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub operations: u64,
}

impl IoSnapshot {
    fn rates(&self, label: &str, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64().max(1e-8);
        format!(
            "{:4} r={} r_sec={}/sec w={} w_sec={}/sec n={} n_sec={}/sec",
            label,
            format_bytes(self.read_bytes as usize),
            format_bytes((self.read_bytes as f64 / secs) as usize),
            format_bytes(self.write_bytes as usize),
            format_bytes((self.write_bytes as f64 / secs) as usize),
            self.operations,
            (self.operations as f64 / secs) as u64,
        )
    }
}

/// Aggregated counters for one collection bracket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub elapsed: Duration,
    pub io: IoSnapshot,
    pub net: IoSnapshot,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "elapsed={:.3}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "  {}", self.io.rates("io", self.elapsed))?;
        write!(f, "  {}", self.net.rates("net", self.elapsed))
    }
}

#[derive(Debug, Default)]
struct Bracket {
    running: usize,
    started: Option<Instant>,
}

/// Reference-counted statistics sink
///
/// Shared via `Arc` between every executor that should report together.
#[derive(Debug, Default)]
pub struct StatsCollector {
    bracket: Mutex<Bracket>,
    io: IoCounters,
    net: IoCounters,
    reports: AtomicU64,
    last: Mutex<Option<StatsReport>>,
}

impl StatsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn io(&self) -> &IoCounters {
        &self.io
    }

    pub fn net(&self) -> &IoCounters {
        &self.net
    }

    pub fn is_running(&self) -> bool {
        self.bracket.lock().running > 0
    }

    /// Number of reports produced so far
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Most recent report, including ones closed by an executor's bracket
    pub fn last_report(&self) -> Option<StatsReport> {
        *self.last.lock()
    }

    /// Enter the bracket. The first entrant resets the counters.
    pub fn start_collecting(&self) {
        let mut bracket = self.bracket.lock();
        bracket.running += 1;
        if bracket.running > 1 {
            return;
        }
        bracket.started = Some(Instant::now());
        self.io.drain();
        self.net.drain();
    }

    /// Leave the bracket. The last one out drains the counters into a report,
    /// logs it and returns it.
    pub fn stop_collecting(&self) -> Option<StatsReport> {
        let mut bracket = self.bracket.lock();
        if bracket.running == 0 {
            tracing::warn!("stop_collecting called without matching start_collecting");
            return None;
        }
        bracket.running -= 1;
        if bracket.running > 0 {
            return None;
        }

        let elapsed = bracket
            .started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let report = StatsReport {
            elapsed,
            io: self.io.drain(),
            net: self.net.drain(),
        };
        drop(bracket);

        self.reports.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(report);
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            "query statistics\n{}",
            report
        );
        Some(report)
    }

    /// Enter the bracket for the lifetime of the returned guard
    pub fn collect(self: &Arc<Self>) -> CollectingGuard {
        self.start_collecting();
        CollectingGuard {
            stats: Arc::clone(self),
        }
    }
}

/// Leaves the stats bracket when dropped
#[must_use = "the bracket closes as soon as the guard is dropped"]
pub struct CollectingGuard {
    stats: Arc<StatsCollector>,
}

impl Drop for CollectingGuard {
    fn drop(&mut self) {
        self.stats.stop_collecting();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_last_stop_reports() {
        let stats = StatsCollector::new();
        stats.start_collecting();
        stats.start_collecting();
        stats.io().record_read(100);
        stats.net().record_read(50);

        assert!(stats.stop_collecting().is_none());
        assert!(stats.is_running());

        let report = stats.stop_collecting().unwrap();
        assert_eq!(report.io.read_bytes, 100);
        assert_eq!(report.io.operations, 1);
        assert_eq!(report.net.read_bytes, 50);
        assert!(!stats.is_running());
        assert_eq!(stats.reports(), 1);

        // Counters were reset by the report
        assert_eq!(stats.io().snapshot(), IoSnapshot::default());
    }

    #[test]
    fn test_first_start_resets_counters() {
        let stats = StatsCollector::new();
        stats.io().record_write(7);
        stats.start_collecting();
        assert_eq!(stats.io().snapshot().write_bytes, 0);
        stats.io().record_write(3);
        let report = stats.stop_collecting().unwrap();
        assert_eq!(report.io.write_bytes, 3);
    }

    #[test]
    fn test_unbalanced_stop_is_ignored() {
        let stats = StatsCollector::new();
        assert!(stats.stop_collecting().is_none());
        assert_eq!(stats.reports(), 0);
    }

    #[test]
    fn test_guard_brackets() {
        let stats = StatsCollector::new();
        {
            let _a = stats.collect();
            let _b = stats.collect();
            assert!(stats.is_running());
        }
        assert!(!stats.is_running());
        assert_eq!(stats.reports(), 1);
        assert!(stats.last_report().is_some());
    }

    #[test]
    fn test_report_display() {
        let report = StatsReport {
            elapsed: Duration::from_secs(2),
            io: IoSnapshot {
                read_bytes: 2048,
                write_bytes: 0,
                operations: 4,
            },
            net: IoSnapshot::default(),
        };
        let text = report.to_string();
        assert!(text.contains("r=2.00 KB"));
        assert!(text.contains("r_sec=1.00 KB/sec"));
        assert!(text.contains("n_sec=2/sec"));
    }
}
