//! Lock-free SPSC ring for committed frame handoff.
//! Zero-allocation after init, cache-line padded head/tail.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ring capacity between each application thread and its validator.
pub const LOG_RING_CAPACITY: usize = 2048;

/// Cache-line aligned wrapper to prevent false sharing.
#[repr(align(64))]
pub struct CachePadded<T>(pub T);

impl<T> CachePadded<T> {
    pub const fn new(val: T) -> Self {
        Self(val)
    }
}

impl<T> core::ops::Deref for CachePadded<T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> core::ops::DerefMut for CachePadded<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Fixed-capacity SPSC ring. Power-of-two capacity for fast modulo.
///
/// Only the producer handle advances `head`, only the consumer handle
/// advances `tail`; `channel()` hands out exactly one of each. The ring
/// carries handles, not frame bytes; frame contents are published through
/// the slab the handle points into.
pub struct SpscRing<T, const N: usize> {
    buffer: UnsafeCell<[Option<T>; N]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// One producer writes a slot strictly before publishing it via `head`
// (release); the consumer observes the publication (acquire) before reading
// the slot, and symmetrically for `tail`. Slots are never aliased.
unsafe impl<T: Send, const N: usize> Send for SpscRing<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for SpscRing<T, N> {}

impl<T, const N: usize> SpscRing<T, N> {
    const MASK: usize = N - 1;

    const _ASSERT_POWER_OF_TWO: () = {
        assert!(N > 0 && (N & (N - 1)) == 0, "N must be power of two");
    };

    fn new() -> Self {
        let _ = Self::_ASSERT_POWER_OF_TWO;
        Self {
            buffer: UnsafeCell::new(core::array::from_fn(|_| None)),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Build a ring and split it into its two endpoint handles.
    pub fn channel() -> (Producer<T, N>, Consumer<T, N>) {
        let ring = Arc::new(Self::new());
        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer { ring },
        )
    }

    #[inline(always)]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

/// Producer endpoint. Owned by the application thread.
pub struct Producer<T, const N: usize> {
    ring: Arc<SpscRing<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Try to push. Returns the value back when the ring is full.
    #[inline]
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            return Err(value);
        }

        unsafe {
            let slot = &mut (*self.ring.buffer.get())[head & SpscRing::<T, N>::MASK];
            *slot = Some(value);
        }

        self.ring.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Push, spinning with a pause hint while the ring is full. In steady
    /// state the producer is rate-limited by the consumer's throughput.
    #[inline]
    pub fn push_spin(&self, value: T) {
        let mut value = value;
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    core::hint::spin_loop();
                }
            }
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }
}

/// Consumer endpoint. Owned by the paired validator thread.
pub struct Consumer<T, const N: usize> {
    ring: Arc<SpscRing<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Try to pop. Returns `None` when the ring is empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let value = unsafe {
            let slot = &mut (*self.ring.buffer.get())[tail & SpscRing::<T, N>::MASK];
            slot.take()
        };

        self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        value
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        tail == head
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let (producer, consumer) = SpscRing::<u64, 16>::channel();

        assert!(producer.try_push(7).is_ok());
        assert_eq!(producer.len(), 1);

        assert_eq!(consumer.try_pop(), Some(7));
        assert!(consumer.is_empty());
        assert_eq!(consumer.try_pop(), None);
    }

    #[test]
    fn test_full() {
        let (producer, consumer) = SpscRing::<u64, 4>::channel();

        for i in 0..4 {
            assert!(producer.try_push(i).is_ok());
        }
        assert_eq!(producer.try_push(99), Err(99));

        assert_eq!(consumer.try_pop(), Some(0));
        assert!(producer.try_push(99).is_ok());
    }

    #[test]
    fn test_fifo_order() {
        let (producer, consumer) = SpscRing::<u64, 64>::channel();
        for i in 0..40 {
            producer.push_spin(i);
        }
        for i in 0..40 {
            assert_eq!(consumer.try_pop(), Some(i));
        }
    }

    #[test]
    fn test_cross_thread_no_loss_no_dup() {
        const TOTAL: u64 = 100_000;
        let (producer, consumer) = SpscRing::<u64, 256>::channel();

        let feeder = std::thread::spawn(move || {
            for i in 0..TOTAL {
                producer.push_spin(i);
            }
        });

        let mut expected = 0u64;
        while expected < TOTAL {
            if let Some(v) = consumer.try_pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                core::hint::spin_loop();
            }
        }
        assert!(consumer.try_pop().is_none());
        feeder.join().unwrap();
    }

    #[test]
    fn test_non_copy_payload() {
        let (producer, consumer) = SpscRing::<Box<u64>, 8>::channel();
        producer.push_spin(Box::new(41));
        assert_eq!(*consumer.try_pop().unwrap(), 41);
    }
}
