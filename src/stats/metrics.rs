//! Statistics and metrics for the relay
//!
//! Counters are plain atomics updated on the hot path; callers read them
//! through `snapshot()`, which returns a copy with no shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Frame source statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// JPEG payloads cut from the process output
    pub frames_delimited: u64,
    /// Payloads that decoded successfully
    pub frames_decoded: u64,
    /// Payloads that failed to decode
    pub decode_errors: u64,
    /// Read sessions abandoned because of bad framing
    pub framing_errors: u64,
    /// Decoded frames discarded because the output slot was full
    pub frames_dropped: u64,
    /// Times the encoder process was started
    pub spawns: u64,
    /// Times the encoder was stopped for lack of demand
    pub pauses: u64,
}

/// Distributor statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributorStats {
    /// Frames encoded for fan-out
    pub frames_encoded: u64,
    /// Frames that failed to encode
    pub encode_errors: u64,
    /// Mailbox offers (one per consumer per frame)
    pub frames_delivered: u64,
    /// Offers that replaced a frame the consumer had not read yet
    pub frames_overwritten: u64,
    /// Registrations refused by the viewer policy
    pub viewers_rejected: u64,
    /// Currently registered consumers
    pub viewers: usize,
    /// Time since the distributor was created
    pub uptime: Duration,
}

impl DistributorStats {
    /// Fraction of offers that overwrote an unread frame
    pub fn overwrite_ratio(&self) -> f64 {
        if self.frames_delivered > 0 {
            self.frames_overwritten as f64 / self.frames_delivered as f64
        } else {
            0.0
        }
    }
}

/// Lock-free counters behind [`SourceStats`]
#[derive(Debug, Default)]
pub(crate) struct SourceCounters {
    pub frames_delimited: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub framing_errors: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub spawns: AtomicU64,
    pub pauses: AtomicU64,
}

impl SourceCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            frames_delimited: self.frames_delimited.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            spawns: self.spawns.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
        }
    }
}

/// Lock-free counters behind [`DistributorStats`]
#[derive(Debug)]
pub(crate) struct DistributorCounters {
    pub frames_encoded: AtomicU64,
    pub encode_errors: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_overwritten: AtomicU64,
    pub viewers_rejected: AtomicU64,
    started_at: Instant,
}

impl DistributorCounters {
    pub fn new() -> Self {
        Self {
            frames_encoded: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_overwritten: AtomicU64::new(0),
            viewers_rejected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, viewers: usize) -> DistributorStats {
        DistributorStats {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            viewers_rejected: self.viewers_rejected.load(Ordering::Relaxed),
            viewers,
            uptime: self.started_at.elapsed(),
        }
    }
}
