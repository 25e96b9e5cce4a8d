//! In-memory key/value engine: the demonstration workload that runs under
//! the redundancy primitive.

pub mod replay;
pub mod table;
pub mod types;

pub use replay::{DelCall, GetCall, KvReplay, SetCall, OP_DEL, OP_GET, OP_SET};
pub use table::HashTable;
pub use types::{GetReply, Key, ReplyCode, Val, KEY_LEN, VAL_LEN};
