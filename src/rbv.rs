//! Replicated-by-value ship-line codec.
//!
//! In the RBV deployment the primary forwards every client request to a
//! replica process: first a header line carrying a 20-character
//! zero-padded decimal microsecond timestamp and the serialized running
//! hash, then the request line exactly as received. The replica
//! re-executes, recomputes the hash, and answers `ACK\n` per request in
//! synchronous mode (and for `quit` always). The replica itself is a
//! separate process; this module is the wire contract both sides share.

/// Replica acknowledgement line.
pub const ACK: &[u8] = b"ACK\n";

/// Width of the zero-padded decimal timestamp.
pub const TIMESTAMP_WIDTH: usize = 20;

/// Width of the serialized hash (lowercase hex of the CRC32 state).
pub const HASH_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbvError {
    TruncatedHeader,
    BadTimestamp,
    BadHash,
    BadModeLine,
}

/// Session preamble: the primary announces whether it expects per-request
/// acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeLine {
    Sync,
    Async,
}

impl ModeLine {
    pub fn encode(&self) -> &'static [u8] {
        match self {
            ModeLine::Sync => b"mode sync\n",
            ModeLine::Async => b"mode async\n",
        }
    }

    /// Parse a preamble line, LF already stripped, optional CR tolerated.
    pub fn parse(line: &[u8]) -> Result<ModeLine, RbvError> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match line {
            b"mode sync" => Ok(ModeLine::Sync),
            b"mode async" => Ok(ModeLine::Async),
            _ => Err(RbvError::BadModeLine),
        }
    }
}

/// Chained CRC32 over the request bodies a node has executed. Primary and
/// replica fold in the same bodies in the same order, so equal states mean
/// equal histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningHash {
    state: u32,
}

impl RunningHash {
    pub const fn new() -> Self {
        Self { state: 0 }
    }

    /// Fold one request body into the chain; returns the new state.
    pub fn update(&mut self, body: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.state);
        hasher.update(body);
        self.state = hasher.finalize();
        self.state
    }

    pub const fn state(&self) -> u32 {
        self.state
    }

    pub const fn from_state(state: u32) -> Self {
        Self { state }
    }
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-request header line shipped ahead of the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipHeader {
    pub timestamp_us: u64,
    pub hash: RunningHash,
}

impl ShipHeader {
    /// `<20-digit timestamp><8-hex hash>\n`.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{:020}{:08x}\n",
            self.timestamp_us,
            self.hash.state()
        )
        .into_bytes()
    }

    /// Parse a header line, LF already stripped.
    pub fn decode(line: &[u8]) -> Result<ShipHeader, RbvError> {
        if line.len() < TIMESTAMP_WIDTH + HASH_WIDTH {
            return Err(RbvError::TruncatedHeader);
        }
        let (ts_bytes, rest) = line.split_at(TIMESTAMP_WIDTH);
        let ts_str = core::str::from_utf8(ts_bytes).map_err(|_| RbvError::BadTimestamp)?;
        let timestamp_us = ts_str.parse::<u64>().map_err(|_| RbvError::BadTimestamp)?;

        let hash_str = core::str::from_utf8(&rest[..HASH_WIDTH]).map_err(|_| RbvError::BadHash)?;
        let state = u32::from_str_radix(hash_str, 16).map_err(|_| RbvError::BadHash)?;

        Ok(ShipHeader {
            timestamp_us,
            hash: RunningHash::from_state(state),
        })
    }
}
