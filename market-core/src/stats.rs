//! Loss accounting for the ingest path.
//!
//! One counter per loss class so operators can see exactly where frames
//! went: rejected at the ring, dropped by the parser, or books resynced.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FeedStats {
    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
    frames_dropped_full: AtomicU64,
    parse_failures: AtomicU64,
    gap_recoveries: AtomicU64,
    handler_panics: AtomicU64,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_pushed(&self) {
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_popped(&self) {
        self.frames_popped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_full(&self) {
        self.frames_dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gap_recovery(&self) {
        self.gap_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_popped: self.frames_popped.load(Ordering::Relaxed),
            frames_dropped_full: self.frames_dropped_full.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            gap_recoveries: self.gap_recoveries.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub frames_dropped_full: u64,
    pub parse_failures: u64,
    pub gap_recoveries: u64,
    pub handler_panics: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = FeedStats::new();
        stats.record_pushed();
        stats.record_pushed();
        stats.record_dropped_full();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_pushed, 2);
        assert_eq!(snap.frames_dropped_full, 1);
        assert_eq!(snap.parse_failures, 0);
    }
}
