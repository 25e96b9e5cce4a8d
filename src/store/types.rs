//! Fixed-width key/value PODs and the in-frame record types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Key width on the wire and in the table. Build-time constant; the
/// request parser slices by offset and never scans inside key bytes.
pub const KEY_LEN: usize = 4;

/// Value width, same discipline.
pub const VAL_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct Key(pub [u8; KEY_LEN]);

impl Key {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// djb2 over the key bytes.
    #[inline]
    pub fn hash(&self) -> u32 {
        let mut hash = 5381u32;
        for &byte in &self.0 {
            hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
        }
        hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct Val(pub [u8; VAL_LEN]);

impl Val {
    pub const fn new(bytes: [u8; VAL_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn zeroed() -> Self {
        Self([0u8; VAL_LEN])
    }
}

/// Response code, also the logged return value of SET and DEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct ReplyCode(pub u32);

impl ReplyCode {
    pub const ERROR: ReplyCode = ReplyCode(0);
    pub const DELETED: ReplyCode = ReplyCode(1);
    pub const NOT_FOUND: ReplyCode = ReplyCode(2);
    pub const STORED: ReplyCode = ReplyCode(3);
    pub const CREATED: ReplyCode = ReplyCode(4);
    pub const END: ReplyCode = ReplyCode(5);

    /// Wire form, CRLF included.
    pub fn wire(&self) -> &'static [u8] {
        match *self {
            ReplyCode::DELETED => b"DELETED\r\n",
            ReplyCode::NOT_FOUND => b"NOT_FOUND\r\n",
            ReplyCode::STORED => b"STORED\r\n",
            ReplyCode::CREATED => b"CREATED\r\n",
            ReplyCode::END => b"END\r\n",
            _ => b"ERROR\r\n",
        }
    }
}

/// Logged return value of GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct GetReply {
    pub found: u32,
    _pad: u32,
    pub val: Val,
}

impl GetReply {
    pub fn hit(val: Val) -> Self {
        Self {
            found: 1,
            _pad: 0,
            val,
        }
    }

    pub fn miss() -> Self {
        Self {
            found: 0,
            _pad: 0,
            val: Val::zeroed(),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.found != 0
    }
}

/// Write record: the bucket index the application derived from the key.
/// The validator recomputes it, so a diverging hash path aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct BucketRecord {
    pub index: u64,
}

/// Read record: the chain-walk outcome the application observed under the
/// bucket lock. This is the only mutable shared state the operations
/// touch, so replaying it makes the validator independent of the live
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ProbeRecord {
    pub found: u32,
    _pad: u32,
    pub val: Val,
}

impl ProbeRecord {
    pub fn hit(val: Val) -> Self {
        Self {
            found: 1,
            _pad: 0,
            val,
        }
    }

    pub fn miss() -> Self {
        Self {
            found: 0,
            _pad: 0,
            val: Val::zeroed(),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.found != 0
    }
}

/// Write record: the value SET is about to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct StoredRecord {
    pub val: Val,
}

const _: () = {
    assert!(core::mem::size_of::<GetReply>() == 16);
    assert!(core::mem::size_of::<ProbeRecord>() == 16);
    assert!(core::mem::size_of::<Key>() == KEY_LEN);
    assert!(core::mem::size_of::<Val>() == VAL_LEN);
};
