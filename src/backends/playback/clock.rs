// SPDX-License-Identifier: GPL-3.0-only

//! Time sources for playback pacing

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Wall clock used to pace playback against recorded timestamps
pub trait PlaybackClock: Send + 'static {
    /// Nanoseconds since an arbitrary fixed point
    fn now_ns(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

/// Real time, measured from one process-wide epoch so timestamps keep
/// increasing across playback restarts
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

static EPOCH: OnceLock<Instant> = OnceLock::new();

impl SystemClock {
    pub fn new() -> Self {
        EPOCH.get_or_init(Instant::now);
        Self
    }
}

impl PlaybackClock for SystemClock {
    fn now_ns(&self) -> u64 {
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when advanced or slept on
///
/// Clones share the same time, so a test can keep one handle while the
/// playback engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set_ns(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl PlaybackClock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let engine_side = clock.clone();
        engine_side.sleep(Duration::from_millis(16));
        clock.advance(Duration::from_millis(4));
        assert_eq!(engine_side.now_ns(), 20_000_000);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock::new();
        let before = clock.now_ns();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now_ns() >= before + 2_000_000);
    }

    #[test]
    fn test_system_clocks_share_an_epoch() {
        let first = SystemClock::new();
        first.sleep(Duration::from_millis(2));
        let before = first.now_ns();
        let later = SystemClock::new();
        assert!(later.now_ns() >= before);
    }
}
