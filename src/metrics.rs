use metrics::{register_counter, register_histogram, Counter, Histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Export pipeline metrics.
///
/// Each event goes to the installed `metrics` recorder and to a local tally
/// readable through [`Metrics::snapshot`].
pub struct Metrics {
    exports_started: Counter,
    exports_succeeded: Counter,
    exports_failed: Counter,
    exports_rejected: Counter,
    logo_failures: Counter,
    cache_hits: Counter,
    cache_misses: Counter,
    export_duration: Histogram,
    tally: Tally,
}

#[derive(Default)]
struct Tally {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    logo_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            exports_started: register_counter!("snapshot_exports_started_total"),
            exports_succeeded: register_counter!("snapshot_exports_succeeded_total"),
            exports_failed: register_counter!("snapshot_exports_failed_total"),
            exports_rejected: register_counter!("snapshot_exports_rejected_total"),
            logo_failures: register_counter!("snapshot_logo_failures_total"),
            cache_hits: register_counter!("snapshot_image_cache_hits_total"),
            cache_misses: register_counter!("snapshot_image_cache_misses_total"),
            export_duration: register_histogram!("snapshot_export_duration_seconds"),
            tally: Tally::default(),
        }
    }

    pub fn record_started(&self) {
        self.exports_started.increment(1);
        self.tally.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export(&self, duration: Duration, success: bool) {
        if success {
            self.exports_succeeded.increment(1);
            self.tally.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.exports_failed.increment(1);
            self.tally.failed.fetch_add(1, Ordering::Relaxed);
        }

        self.export_duration.record(duration.as_secs_f64());
    }

    pub fn record_rejected(&self) {
        self.exports_rejected.increment(1);
        self.tally.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_logo_failure(&self) {
        self.logo_failures.increment(1);
        self.tally.logo_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.increment(1);
            self.tally.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.increment(1);
            self.tally.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |value: &AtomicU64| value.load(Ordering::Relaxed);
        MetricsSnapshot {
            exports_started: load(&self.tally.started),
            exports_succeeded: load(&self.tally.succeeded),
            exports_failed: load(&self.tally.failed),
            exports_rejected: load(&self.tally.rejected),
            logo_failures: load(&self.tally.logo_failures),
            cache_hits: load(&self.tally.cache_hits),
            cache_misses: load(&self.tally.cache_misses),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub exports_started: u64,
    pub exports_succeeded: u64,
    pub exports_failed: u64,
    pub exports_rejected: u64,
    pub logo_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl MetricsSnapshot {
    /// Share of finished exports that succeeded, 0.0 when none finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.exports_succeeded + self.exports_failed;
        if finished == 0 {
            return 0.0;
        }
        self.exports_succeeded as f64 / finished as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_tracks_events() {
        let metrics = Metrics::new();
        metrics.record_started();
        metrics.record_export(Duration::from_millis(20), true);
        metrics.record_started();
        metrics.record_export(Duration::from_millis(5), false);
        metrics.record_rejected();
        metrics.record_cache(true);
        metrics.record_cache(false);
        metrics.record_cache(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.exports_started, 2);
        assert_eq!(snapshot.exports_succeeded, 1);
        assert_eq!(snapshot.exports_failed, 1);
        assert_eq!(snapshot.exports_rejected, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert!((snapshot.success_rate() - 0.5).abs() < f64::EPSILON);
    }
}
