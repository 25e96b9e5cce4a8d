//! Validator side of the key/value workload: the closed-world closure
//! records and their typed re-execution.
//!
//! Every validator face recomputes what the application face derived
//! (bucket index, stored bytes, return value) purely from the recorded
//! arguments and the logged chain-walk observation; it never reads the
//! live table.

use crate::runtime::{redundant, Call, FrameCursor, LogWriter, Replay};

use super::table::HashTable;
use super::types::{BucketRecord, GetReply, Key, ProbeRecord, ReplyCode, StoredRecord, Val};

pub const OP_GET: u32 = 1;
pub const OP_SET: u32 = 2;
pub const OP_DEL: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct GetCall {
    pub key: Key,
}

impl Call for GetCall {
    const TAG: u32 = OP_GET;
    type Ret = GetReply;

    fn append_args(&self, writer: &mut LogWriter) {
        writer.append(&self.key);
    }

    fn read_args(cursor: &mut FrameCursor<'_>) -> Self {
        Self {
            key: cursor.fetch(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetCall {
    pub key: Key,
    pub val: Val,
}

impl Call for SetCall {
    const TAG: u32 = OP_SET;
    type Ret = ReplyCode;

    fn append_args(&self, writer: &mut LogWriter) {
        writer.append(&self.key);
        writer.append(&self.val);
    }

    fn read_args(cursor: &mut FrameCursor<'_>) -> Self {
        Self {
            key: cursor.fetch(),
            val: cursor.fetch(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DelCall {
    pub key: Key,
}

impl Call for DelCall {
    const TAG: u32 = OP_DEL;
    type Ret = ReplyCode;

    fn append_args(&self, writer: &mut LogWriter) {
        writer.append(&self.key);
    }

    fn read_args(cursor: &mut FrameCursor<'_>) -> Self {
        Self {
            key: cursor.fetch(),
        }
    }
}

/// Tag dispatch for the key/value verbs. Carries only the bucket mask, so
/// a replay is independent of the table it shadows.
#[derive(Debug, Clone, Copy)]
pub struct KvReplay {
    mask: u64,
}

impl KvReplay {
    pub fn for_table(table: &HashTable) -> Self {
        Self {
            mask: table.bucket_mask(),
        }
    }

    #[inline]
    fn check_bucket(&self, key: &Key, cursor: &mut FrameCursor<'_>) {
        let index = u64::from(key.hash()) & self.mask;
        cursor.check(&BucketRecord { index });
    }

    fn validate_get(&self, cursor: &mut FrameCursor<'_>) {
        let call = GetCall::read_args(cursor);
        self.check_bucket(&call.key, cursor);
        let probe: ProbeRecord = cursor.fetch();
        let reply = if probe.is_hit() {
            GetReply::hit(probe.val)
        } else {
            GetReply::miss()
        };
        cursor.check(&reply);
    }

    fn validate_set(&self, cursor: &mut FrameCursor<'_>) {
        let call = SetCall::read_args(cursor);
        self.check_bucket(&call.key, cursor);
        let probe: ProbeRecord = cursor.fetch();
        cursor.check(&StoredRecord { val: call.val });
        let reply = if probe.is_hit() {
            ReplyCode::STORED
        } else {
            ReplyCode::CREATED
        };
        cursor.check(&reply);
    }

    fn validate_del(&self, cursor: &mut FrameCursor<'_>) {
        let call = DelCall::read_args(cursor);
        self.check_bucket(&call.key, cursor);
        let probe: ProbeRecord = cursor.fetch();
        let reply = if probe.is_hit() {
            ReplyCode::DELETED
        } else {
            ReplyCode::NOT_FOUND
        };
        cursor.check(&reply);
    }
}

impl Replay for KvReplay {
    fn replay(&self, tag: u32, cursor: &mut FrameCursor<'_>) {
        match tag {
            OP_GET => self.validate_get(cursor),
            OP_SET => self.validate_set(cursor),
            OP_DEL => self.validate_del(cursor),
            other => redundant::unknown_tag(other),
        }
    }
}
