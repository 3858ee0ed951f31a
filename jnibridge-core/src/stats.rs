//! Call accounting for the bridge
//!
//! Lock-free counters bumped on the hot path of every cross-runtime call.
//! A [`ScopedCallTimer`] records one call when dropped, so early returns and
//! translated exceptions are counted the same way as successful calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Running totals for one bridge instance
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub foreign_calls: AtomicU64,
    pub foreign_call_time_ns: AtomicU64,

    // Exception translation
    pub managed_exceptions: AtomicU64,
    pub oom_fallbacks: AtomicU64,

    pub acquisitions: AtomicU64,
    pub acquisition_failures: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one completed foreign call
    pub fn record_call(&self, duration: Duration) {
        self.foreign_calls.fetch_add(1, Ordering::Relaxed);
        self.foreign_call_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_managed_exception(&self) {
        self.managed_exceptions.fetch_add(1, Ordering::Relaxed);
    }

    /// A diagnostic call raised while translating another exception
    pub fn record_oom_fallback(&self) {
        self.oom_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition_failure(&self) {
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let calls = self.foreign_calls.load(Ordering::Relaxed);
        let total_ns = self.foreign_call_time_ns.load(Ordering::Relaxed);
        StatsSnapshot {
            foreign_calls: calls,
            avg_call_ms: if calls == 0 {
                0.0
            } else {
                (total_ns as f64) / (calls as f64) / 1_000_000.0
            },
            managed_exceptions: self.managed_exceptions.load(Ordering::Relaxed),
            oom_fallbacks: self.oom_fallbacks.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.foreign_calls,
            &self.foreign_call_time_ns,
            &self.managed_exceptions,
            &self.oom_fallbacks,
            &self.acquisitions,
            &self.acquisition_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub foreign_calls: u64,
    pub avg_call_ms: f64,
    pub managed_exceptions: u64,
    pub oom_fallbacks: u64,
    pub acquisitions: u64,
    pub acquisition_failures: u64,
}

impl StatsSnapshot {
    /// Print a human-readable report
    pub fn print_report(&self) {
        println!("╔═══════════════════════════════════════════════════════════╗");
        println!("║         jnibridge Call Report                             ║");
        println!("╠═══════════════════════════════════════════════════════════╣");
        println!(
            "║   Foreign calls: {:>8} (avg: {:>8.3} ms)            ║",
            self.foreign_calls, self.avg_call_ms
        );
        println!(
            "║   Managed exceptions: {:>8}                            ║",
            self.managed_exceptions
        );
        println!(
            "║   OOM fallbacks:      {:>8}                            ║",
            self.oom_fallbacks
        );
        println!("╠═══════════════════════════════════════════════════════════╣");
        println!(
            "║   Acquisitions: {:>8} (failed: {:>8})              ║",
            self.acquisitions, self.acquisition_failures
        );
        println!("╚═══════════════════════════════════════════════════════════╝");
    }
}

/// Records one foreign call on drop
pub struct ScopedCallTimer<'a> {
    start: Instant,
    stats: &'a BridgeStats,
}

impl<'a> ScopedCallTimer<'a> {
    pub fn new(stats: &'a BridgeStats) -> Self {
        Self {
            start: Instant::now(),
            stats,
        }
    }
}

impl Drop for ScopedCallTimer<'_> {
    fn drop(&mut self) {
        self.stats.record_call(self.start.elapsed());
    }
}
