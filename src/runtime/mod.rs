//! The redundancy runtime: slab arena, frame log, SPSC ring, and the
//! `run2` primitive with its paired validator threads.
//!
//! Everything process-wide (the slab free list, the validation
//! concurrency gate, the counters) lives in one [`Runtime`] value owned
//! by `main` and passed down. Each application thread calls
//! [`Runtime::register`] once to obtain its [`Session`], which spawns and
//! permanently pairs a validator thread with it.

pub mod affinity;
pub mod arena;
pub mod gate;
pub mod log;
pub mod redundant;
pub mod ring;

use std::sync::Arc;

pub use arena::{SlabPool, MAX_LOG_BUFFER_SIZE, MIN_LOG_BUFFER_SIZE};
pub use log::{FrameCursor, FrameHandle, LogWriter, Record, Recorder, TAIL_MAGIC};
pub use redundant::{
    Call, Replay, Session, TagRecord, ValidationMode, ValidationTicket,
};
pub use ring::{Consumer, Producer, SpscRing, LOG_RING_CAPACITY};

use crate::stats::RuntimeStats;
use gate::ValidationGate;

/// Runtime-wide policy. Sampling only exists in asynchronous mode, so the
/// forbidden "synchronous + sampling" combination is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub mode: ValidationMode,
    /// Cap on frames being validated concurrently across the process.
    /// `None` disables the gate.
    pub max_concurrent_validations: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Asynchronous {
                sampling_percent: 100,
            },
            max_concurrent_validations: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("sampling rate {0} exceeds 100")]
    SamplingOutOfRange(u8),
    #[error("validation concurrency limit must be nonzero")]
    ZeroConcurrencyLimit,
}

/// Owner of all process-wide redundancy state.
pub struct Runtime {
    pool: Arc<SlabPool>,
    stats: Arc<RuntimeStats>,
    gate: Option<Arc<ValidationGate>>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        if let ValidationMode::Asynchronous { sampling_percent } = config.mode {
            if sampling_percent > 100 {
                return Err(ConfigError::SamplingOutOfRange(sampling_percent));
            }
        }
        if config.max_concurrent_validations == Some(0) {
            return Err(ConfigError::ZeroConcurrencyLimit);
        }

        let stats = Arc::new(RuntimeStats::new());
        Ok(Self {
            pool: Arc::new(SlabPool::new(Arc::clone(&stats))),
            gate: config
                .max_concurrent_validations
                .map(|limit| Arc::new(ValidationGate::new(limit))),
            stats,
            config,
        })
    }

    /// Pair the calling application thread with a fresh validator thread.
    /// Applies `SCEE_WORK_CPUSET` to the caller.
    pub fn register<R: Replay>(&self, replay: R) -> Session {
        Session::spawn(
            Arc::clone(&self.pool),
            Arc::clone(&self.stats),
            self.gate.clone(),
            self.config.mode,
            replay,
        )
    }

    pub fn mode(&self) -> ValidationMode {
        self.config.mode
    }

    pub fn stats(&self) -> &Arc<RuntimeStats> {
        &self.stats
    }
}
