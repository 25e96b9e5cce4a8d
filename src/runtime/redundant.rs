//! The redundancy primitive: record a call on the application thread,
//! re-execute and compare it on the paired validator thread.
//!
//! `Session::run2` wraps one request: it appends a closure record (tag +
//! arguments), runs the application implementation while a [`Recorder`]
//! captures its reads and writes of mutable shared state, appends the
//! return value, commits the frame, and hands it to the validator through
//! the SPSC ring. The validator re-runs the typed operation for the tag:
//! reads come from the log, recomputed writes and the recomputed return
//! value are byte-compared against it. Divergence aborts the process.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::affinity;
use super::arena::SlabPool;
use super::gate::ValidationGate;
use super::log::{integrity_failure, FrameCursor, FrameHandle, LogWriter, Record, Recorder};
use super::ring::{Consumer, Producer, SpscRing, LOG_RING_CAPACITY};
use crate::stats::{monotonic_us, RuntimeStats};

/// Whether a client response waits for its frame's validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// The response is withheld until the validator raises the frame's
    /// ticket. Every frame is validated; sampling does not apply.
    Synchronous,
    /// The response is written immediately; validation runs behind the
    /// request. `sampling_percent` of frames are replayed, the rest are
    /// reclaimed unread.
    Asynchronous { sampling_percent: u8 },
}

impl ValidationMode {
    pub const fn is_synchronous(&self) -> bool {
        matches!(self, ValidationMode::Synchronous)
    }
}

/// Single-word signal raised by the validator when a frame has been
/// validated (or reclaimed through a bypass path). Lives on the request
/// path for exactly one synchronous `run2`.
pub struct ValidationTicket {
    state: AtomicU32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ValidationTicket {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn complete(&self) {
        self.state.store(1, Ordering::Release);
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    pub(crate) fn wait(&self) {
        if self.state.load(Ordering::Acquire) != 0 {
            return;
        }
        let mut guard = self.lock.lock();
        while self.state.load(Ordering::Acquire) == 0 {
            self.cond.wait(&mut guard);
        }
    }
}

impl Default for ValidationTicket {
    fn default() -> Self {
        Self::new()
    }
}

/// First record of every frame: identifies the operation to re-run.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TagRecord {
    pub tag: u32,
    _pad: u32,
}

impl TagRecord {
    pub const fn new(tag: u32) -> Self {
        Self { tag, _pad: 0 }
    }
}

/// A recordable call: one operation of the closed verb set, carrying
/// trivially-copyable arguments and return value.
pub trait Call: Sized {
    /// Dispatch tag written into the frame's closure record.
    const TAG: u32;
    /// Return value; byte-compared between the two executions.
    type Ret: Record + PartialEq;

    /// Append the argument tuple to the frame.
    fn append_args(&self, writer: &mut LogWriter);
    /// Read the argument tuple back with the same bit-pattern.
    fn read_args(cursor: &mut FrameCursor<'_>) -> Self;
}

/// The workload's validator dispatch: re-execute the call recorded at
/// `cursor` (its tag record already consumed) and compare every output,
/// including the logged return value, via [`FrameCursor::check`].
///
/// This is also the seam where an alternative integrity discipline (such
/// as a CRC-checked transactional region) would plug in.
pub trait Replay: Send + 'static {
    fn replay(&self, tag: u32, cursor: &mut FrameCursor<'_>);
}

/// One application thread's endpoint into the redundancy runtime: its log
/// writer, its ring producer, and its paired validator thread.
///
/// Dropping the session stops the validator and drains the ring, so every
/// committed frame is still validated (or sampled out) before the threads
/// part ways.
pub struct Session {
    writer: LogWriter,
    producer: Producer<FrameHandle, LOG_RING_CAPACITY>,
    mode: ValidationMode,
    stats: Arc<RuntimeStats>,
    stop: Arc<AtomicBool>,
    validator: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn spawn<R: Replay>(
        pool: Arc<SlabPool>,
        stats: Arc<RuntimeStats>,
        gate: Option<Arc<ValidationGate>>,
        mode: ValidationMode,
        replay: R,
    ) -> Session {
        affinity::apply_env(affinity::WORK_CPUSET_ENV);

        let (producer, consumer) = SpscRing::<FrameHandle, LOG_RING_CAPACITY>::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let validator = {
            let stop = Arc::clone(&stop);
            let pool = Arc::clone(&pool);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("remora-validator".into())
                .spawn(move || validator_loop(consumer, stop, replay, pool, stats, gate, mode))
                .expect("spawn validator thread")
        };

        Session {
            writer: LogWriter::new(pool),
            producer,
            mode,
            stats,
            stop,
            validator: Some(validator),
        }
    }

    /// Execute `app` and guarantee that, before the frame is reclaimed,
    /// the validator re-runs the recorded call with the same argument
    /// bit-pattern and its outputs compare equal. In synchronous mode the
    /// call returns only after the validator has acknowledged the frame.
    pub fn run2<C, F>(&mut self, call: C, app: F) -> C::Ret
    where
        C: Call,
        F: FnOnce(&C, &mut Recorder<'_>) -> C::Ret,
    {
        let ticket = match self.mode {
            ValidationMode::Synchronous => Some(Arc::new(ValidationTicket::new())),
            ValidationMode::Asynchronous { .. } => None,
        };

        self.writer.begin_frame();
        self.writer.append(&TagRecord::new(C::TAG));
        call.append_args(&mut self.writer);

        let ret = {
            let mut recorder = Recorder::new(&mut self.writer);
            app(&call, &mut recorder)
        };
        self.writer.append(&ret);

        let handle = self.writer.commit(ticket.clone());
        self.stats.record_commit();
        self.producer.push_spin(handle);

        if let Some(ticket) = ticket {
            ticket.wait();
        }
        ret
    }

    /// Self-checking variant: the workload registers the same function for
    /// this call's tag on the validator side, so one implementation is
    /// exercised twice instead of two implementations once each.
    pub fn run<C, F>(&mut self, call: C, f: F) -> C::Ret
    where
        C: Call,
        F: FnOnce(&C, &mut Recorder<'_>) -> C::Ret,
    {
        self.run2(call, f)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Frames committed but not yet consumed by the validator.
    pub fn backlog(&self) -> usize {
        self.producer.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.writer.finalize();
        self.stop.store(true, Ordering::Relaxed);
        if let Some(validator) = self.validator.take() {
            let _ = validator.join();
        }
    }
}

fn validator_loop<R: Replay>(
    consumer: Consumer<FrameHandle, LOG_RING_CAPACITY>,
    stop: Arc<AtomicBool>,
    replay: R,
    pool: Arc<SlabPool>,
    stats: Arc<RuntimeStats>,
    gate: Option<Arc<ValidationGate>>,
    mode: ValidationMode,
) {
    affinity::apply_env(affinity::VALIDATION_CPUSET_ENV);
    let mut rng = rand::thread_rng();

    while !stop.load(Ordering::Relaxed) {
        while consumer.is_empty() && !stop.load(Ordering::Relaxed) {
            core::hint::spin_loop();
        }
        while let Some(handle) = consumer.try_pop() {
            validate_one(handle, &replay, &pool, &stats, gate.as_deref(), mode, &mut rng);
        }
    }

    // Drain whatever was committed before the stop flag landed.
    while let Some(handle) = consumer.try_pop() {
        validate_one(handle, &replay, &pool, &stats, gate.as_deref(), mode, &mut rng);
    }
}

fn validate_one<R: Replay>(
    handle: FrameHandle,
    replay: &R,
    pool: &SlabPool,
    stats: &RuntimeStats,
    gate: Option<&ValidationGate>,
    mode: ValidationMode,
    rng: &mut impl Rng,
) {
    let sampled_in = match mode {
        ValidationMode::Synchronous => true,
        ValidationMode::Asynchronous { sampling_percent } => {
            sampling_percent >= 100 || rng.gen_range(0..100u32) < u32::from(sampling_percent)
        }
    };
    if !sampled_in {
        stats.record_skipped();
        handle.reclaim(pool);
        return;
    }

    match gate {
        None => run_replay(handle, replay, pool, stats),
        Some(gate) if mode.is_synchronous() => {
            gate.admit_sync();
            run_replay(handle, replay, pool, stats);
            gate.leave_sync();
        }
        Some(gate) => {
            if gate.admit_async() {
                run_replay(handle, replay, pool, stats);
            } else {
                stats.record_skipped();
                handle.reclaim(pool);
            }
            gate.leave_async();
        }
    }
}

fn run_replay<R: Replay>(
    handle: FrameHandle,
    replay: &R,
    pool: &SlabPool,
    stats: &RuntimeStats,
) {
    let start_us = handle.start_us();
    let mut cursor = FrameCursor::open(&handle);
    let tag: TagRecord = cursor.fetch();
    replay.replay(tag.tag, &mut cursor);
    cursor.finish();
    stats.record_validated(monotonic_us().saturating_sub(start_us));
    handle.reclaim(pool);
}

/// Replay dispatch fell off the closed world: the tag bytes themselves
/// are corrupt.
#[cold]
pub fn unknown_tag(tag: u32) -> ! {
    tracing::error!(target: "remora::validator", tag, "unknown closure tag");
    integrity_failure("unknown closure tag");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_completes_across_threads() {
        let ticket = Arc::new(ValidationTicket::new());
        let signaller = {
            let ticket = Arc::clone(&ticket);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                ticket.complete();
            })
        };
        ticket.wait();
        signaller.join().unwrap();
    }

    #[test]
    fn test_ticket_wait_after_complete_returns_immediately() {
        let ticket = ValidationTicket::new();
        ticket.complete();
        ticket.wait();
    }

    #[test]
    fn test_mode_predicates() {
        assert!(ValidationMode::Synchronous.is_synchronous());
        assert!(!ValidationMode::Asynchronous { sampling_percent: 50 }.is_synchronous());
    }
}
