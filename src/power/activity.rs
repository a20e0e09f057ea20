//! Activity clock
//!
//! Two timestamps, in milliseconds since the clock was created: the last
//! received packet and the last local interaction (button edge, talking).
//! Written from the receive task and the orchestrator, read by the power
//! gate, so both are atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_packet_ms: AtomicU64,
    last_interaction_ms: AtomicU64,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_packet_ms: AtomicU64::new(0),
            last_interaction_ms: AtomicU64::new(0),
        }
    }

    /// Milliseconds since the clock was created
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn record_packet(&self) {
        self.record_packet_at(self.now_ms());
    }

    pub fn record_packet_at(&self, now_ms: u64) {
        self.last_packet_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn record_interaction(&self) {
        self.record_interaction_at(self.now_ms());
    }

    pub fn record_interaction_at(&self, now_ms: u64) {
        self.last_interaction_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Restart both timers (wake from sleep)
    pub fn reset_at(&self, now_ms: u64) {
        self.last_packet_ms.store(now_ms, Ordering::Relaxed);
        self.last_interaction_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_packet_ms(&self) -> u64 {
        self.last_packet_ms.load(Ordering::Relaxed)
    }

    pub fn last_interaction_ms(&self) -> u64 {
        self.last_interaction_ms.load(Ordering::Relaxed)
    }

    /// Time since the most recent activity of either kind
    pub fn idle_at(&self, now_ms: u64) -> Duration {
        let last = self.last_packet_ms().max(self.last_interaction_ms());
        Duration::from_millis(now_ms.saturating_sub(last))
    }

    pub fn idle(&self) -> Duration {
        self.idle_at(self.now_ms())
    }
}
