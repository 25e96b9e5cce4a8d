//! Lightweight runtime counters. No allocations, no locks, just atomics.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Microseconds since the first call in this process. Monotonic.
#[inline]
pub fn monotonic_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Counters for the redundancy pipeline. All monotonic.
///
/// `frames_committed` is bumped by application threads on every `commit`;
/// `frames_validated` and `frames_skipped` are bumped by validator threads
/// and partition the reclaimed frames between the replay path and the
/// sampling/gate bypass. At quiesce the three satisfy
/// `committed == validated + skipped`.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    pub frames_committed: AtomicU64,
    pub frames_validated: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub slabs_acquired: AtomicU64,
    pub slabs_released: AtomicU64,
    pub validation_latency_total_us: AtomicU64,
    pub validation_latency_max_us: AtomicU64,
}

impl RuntimeStats {
    pub const fn new() -> Self {
        Self {
            frames_committed: AtomicU64::new(0),
            frames_validated: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            slabs_acquired: AtomicU64::new(0),
            slabs_released: AtomicU64::new(0),
            validation_latency_total_us: AtomicU64::new(0),
            validation_latency_max_us: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn record_commit(&self) {
        self.frames_committed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_validated(&self, latency_us: u64) {
        self.frames_validated.fetch_add(1, Ordering::Relaxed);
        self.validation_latency_total_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.update_max_latency(latency_us);
    }

    #[inline(always)]
    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_slab_acquired(&self) {
        self.slabs_acquired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_slab_released(&self) {
        self.slabs_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn update_max_latency(&self, latency_us: u64) {
        let mut current = self.validation_latency_max_us.load(Ordering::Relaxed);
        while latency_us > current {
            match self.validation_latency_max_us.compare_exchange_weak(
                current,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    pub fn committed(&self) -> u64 {
        self.frames_committed.load(Ordering::Relaxed)
    }

    pub fn validated(&self) -> u64 {
        self.frames_validated.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn slabs_in_flight(&self) -> u64 {
        self.slabs_acquired.load(Ordering::Relaxed) - self.slabs_released.load(Ordering::Relaxed)
    }

    pub fn avg_validation_latency_us(&self) -> u64 {
        let validated = self.validated();
        if validated == 0 {
            0
        } else {
            self.validation_latency_total_us.load(Ordering::Relaxed) / validated
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_committed: self.committed(),
            frames_validated: self.validated(),
            frames_skipped: self.skipped(),
            slabs_acquired: self.slabs_acquired.load(Ordering::Relaxed),
            slabs_released: self.slabs_released.load(Ordering::Relaxed),
            avg_validation_latency_us: self.avg_validation_latency_us(),
            max_validation_latency_us: self.validation_latency_max_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_committed: u64,
    pub frames_validated: u64,
    pub frames_skipped: u64,
    pub slabs_acquired: u64,
    pub slabs_released: u64,
    pub avg_validation_latency_us: u64,
    pub max_validation_latency_us: u64,
}
