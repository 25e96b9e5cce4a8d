//! # Remora
//!
//! A redundant-execution validation runtime for in-memory services: the
//! application thread executes a request and records its inputs and
//! observed outputs into a log frame; a permanently paired validator
//! thread re-executes the recorded call and checks the outputs match
//! bit-for-bit. Divergence means silent data corruption (a hardware
//! fault, a bitflip, or an adversary) and aborts the process.
//!
//! ## Architecture
//!
//! - [`runtime`]: the redundancy machinery; a slab arena of recyclable
//!   log buffers, a per-thread frame writer, an SPSC ring to the paired
//!   validator, and the [`runtime::Session::run2`] primitive.
//! - [`store`]: the demonstration workload, a bucketed in-memory
//!   key/value table whose operations run under `run2`.
//! - [`server`]: an edge-triggered TCP dispatcher; one application
//!   thread per group, line-framed fixed-width requests.
//! - [`rbv`]: the wire contract shared with the replicated-by-value
//!   replica deployment.
//!
//! ## Validation modes
//!
//! Synchronous mode withholds each response until the frame's validation
//! ticket is raised. Asynchronous mode responds immediately and validates
//! behind the request, optionally sampling only a fraction of frames.
//!
//! ## Example
//!
//! ```no_run
//! use remora::runtime::{Runtime, RuntimeConfig};
//! use remora::store::{HashTable, KvReplay, SetCall, Key, Val};
//! use std::sync::Arc;
//!
//! let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
//! let table = Arc::new(HashTable::with_capacity(1 << 16));
//! let mut session = runtime.register(KvReplay::for_table(&table));
//!
//! let reply = session.run2(
//!     SetCall { key: Key::new(*b"abcd"), val: Val::new(*b"12345678") },
//!     |call, rec| table.set(&call.key, &call.val, rec),
//! );
//! ```

pub mod rbv;
pub mod runtime;
pub mod server;
pub mod stats;
pub mod store;

/// Prelude for convenient imports of primary API types.
pub mod prelude {
    pub use crate::runtime::{Call, Replay, Runtime, RuntimeConfig, Session, ValidationMode};
    pub use crate::server::{Server, ServerConfig, ServerError};
    pub use crate::stats::{RuntimeStats, StatsSnapshot};
    pub use crate::store::{
        DelCall, GetCall, HashTable, Key, KvReplay, ReplyCode, SetCall, Val, KEY_LEN, VAL_LEN,
    };
}

pub use runtime::{Runtime, RuntimeConfig, Session, ValidationMode};
pub use server::{Server, ServerConfig, ServerError};
