//! Transport statistics and receive sequence tracking
//!
//! Counters are plain atomics so the audio task, the receive task and
//! the housekeeping task can all touch them without contention. The
//! sequence baseline is a small mutex-guarded record because it is
//! read-modify-written as a unit.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks the last received sequence number and derives gaps.
///
/// Out-of-order and duplicate packets are accepted and become the new
/// baseline; they never reduce a loss count already recorded. Scrambled
/// arrival therefore undercounts loss.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival and return how many packets were skipped before it.
    ///
    /// The first arrival only establishes the baseline.
    pub fn observe(&mut self, sequence: u32) -> u32 {
        let lost = match self.last {
            Some(last) => {
                let expected = last.wrapping_add(1);
                if sequence > expected {
                    sequence - expected
                } else {
                    0
                }
            }
            None => 0,
        };
        self.last = Some(sequence);
        lost
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Cumulative transport counters
#[derive(Debug, Default)]
pub struct TransportStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_lost: AtomicU64,
    malformed: AtomicU64,
    send_failures: AtomicU64,
    tracker: Mutex<SequenceTracker>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a valid packet; returns the gap detected before it
    pub fn record_received(&self, sequence: u32, bytes: usize) -> u32 {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);

        let lost = self.tracker.lock().observe(sequence);
        if lost > 0 {
            self.packets_lost.fetch_add(lost as u64, Ordering::Relaxed);
        }
        lost
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost.load(Ordering::Relaxed)
    }

    /// Consistent-enough copy for reporting
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter and forget the receive baseline
    pub fn reset(&self) {
        self.packets_sent.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.packets_lost.store(0, Ordering::Relaxed);
        self.malformed.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.tracker.lock().reset();
    }
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    pub malformed: u64,
    pub send_failures: u64,
}

impl StatsSnapshot {
    /// `lost / (received + lost) * 100`, zero before anything arrived
    pub fn loss_percent(&self) -> f32 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            0.0
        } else {
            self.packets_lost as f32 / total as f32 * 100.0
        }
    }
}
