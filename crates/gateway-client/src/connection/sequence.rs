//! Last observed dispatch sequence number

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic holder of the highest sequence number seen
///
/// Updated by the coordinator, read concurrently by the heartbeat task.
#[derive(Debug)]
pub struct SequenceTracker {
    value: AtomicI64,
}

impl SequenceTracker {
    /// Value before any sequenced packet was seen
    pub const NONE: i64 = -1;

    #[must_use]
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(Self::NONE),
        }
    }

    /// Highest sequence observed so far, or [`Self::NONE`]
    pub fn current(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Apply `seq = max(seq, observed)` and return the resulting value
    pub fn observe(&self, observed: i64) -> i64 {
        self.value.fetch_max(observed, Ordering::AcqRel).max(observed)
    }

    /// Forget everything; only valid when a brand-new session is about to start
    pub(crate) fn reset(&self) {
        self.value.store(Self::NONE, Ordering::Release);
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_starts_empty() {
        assert_eq!(SequenceTracker::new().current(), -1);
    }

    #[test]
    fn test_never_regresses() {
        let tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(5), 5);
        assert_eq!(tracker.observe(3), 5);
        assert_eq!(tracker.observe(9), 9);
        assert_eq!(tracker.current(), 9);

        tracker.reset();
        assert_eq!(tracker.current(), SequenceTracker::NONE);
    }

    #[test]
    fn test_concurrent_readers_never_see_decrease() {
        let tracker = Arc::new(SequenceTracker::new());
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let tracker = tracker.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut last = SequenceTracker::NONE;
                while !done.load(Ordering::Acquire) {
                    let now = tracker.current();
                    assert!(now >= last, "sequence went from {last} to {now}");
                    last = now;
                }
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    // Interleaved, out-of-order values per writer
                    for i in 0..10_000_i64 {
                        let seq = if i % 2 == 0 { i * 4 + w } else { (i - 1) * 2 };
                        tracker.observe(seq);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        assert_eq!(tracker.current(), 9_998 * 4 + 3);
    }
}
