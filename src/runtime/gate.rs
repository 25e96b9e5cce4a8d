//! Optional cap on frames being validated concurrently across the process.

use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Process-wide validation concurrency limit.
///
/// Synchronous mode blocks at the gate until a slot frees; asynchronous
/// mode admits or tells the caller to reclaim the frame unvalidated.
pub struct ValidationGate {
    active: AtomicUsize,
    limit: usize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ValidationGate {
    pub fn new(limit: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            limit,
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Blocking admission: waits until the validator count is below the cap.
    pub fn admit_sync(&self) {
        loop {
            let current = self.active.load(Ordering::Relaxed);
            if current < self.limit {
                if self
                    .active
                    .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            let mut guard = self.lock.lock();
            // Re-check under the lock so a concurrent leave cannot slip
            // its notify between the load and the wait.
            if self.active.load(Ordering::Relaxed) < self.limit {
                continue;
            }
            self.cond.wait(&mut guard);
        }
    }

    pub fn leave_sync(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    /// Non-blocking admission: returns whether this frame should actually
    /// be validated. The caller must always pair it with `leave_async`.
    #[inline]
    pub fn admit_async(&self) -> bool {
        self.active.fetch_add(1, Ordering::Relaxed) < self.limit
    }

    #[inline]
    pub fn leave_async(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_async_admits_under_limit() {
        let gate = ValidationGate::new(2);
        assert!(gate.admit_async());
        assert!(gate.admit_async());
        assert!(!gate.admit_async());
        gate.leave_async();
        gate.leave_async();
        gate.leave_async();
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn test_sync_blocks_until_slot_frees() {
        let gate = Arc::new(ValidationGate::new(1));
        gate.admit_sync();

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                gate.admit_sync();
                gate.leave_sync();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(gate.active(), 1);
        gate.leave_sync();
        waiter.join().unwrap();
        assert_eq!(gate.active(), 0);
    }
}
