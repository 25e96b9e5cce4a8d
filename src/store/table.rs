//! Bucketed hash table: the demonstration workload under redundancy.
//!
//! Fixed power-of-two bucket count, djb2 hashing, one mutex per bucket,
//! singly linked entry chains with unique keys. The application faces
//! (`get`/`set`/`del`) run against the live table and record what they
//! observed and stored; validators never touch the table (see
//! `store::replay`), so overwrites and unlinks are plain in-place
//! mutations under the bucket lock.

use parking_lot::Mutex;

use crate::runtime::Recorder;

use super::types::{BucketRecord, GetReply, Key, ProbeRecord, ReplyCode, StoredRecord, Val};

struct Entry {
    key: Key,
    val: Val,
    next: Option<Box<Entry>>,
}

#[derive(Default)]
struct Bucket {
    head: Mutex<Option<Box<Entry>>>,
}

/// Fixed-capacity open-hash table. The demo deployment uses 2^24 buckets;
/// tests shrink it.
pub struct HashTable {
    buckets: Box<[Bucket]>,
    mask: u64,
}

impl HashTable {
    /// `capacity` must be a power of two: the bucket index is
    /// `hash mod capacity`, reduced with a mask.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let buckets = (0..capacity).map(|_| Bucket::default()).collect();
        Self {
            buckets,
            mask: capacity as u64 - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Mask used by the validator side to recompute bucket indices.
    pub(crate) fn bucket_mask(&self) -> u64 {
        self.mask
    }

    #[inline]
    fn bucket_index(&self, key: &Key) -> u64 {
        u64::from(key.hash()) & self.mask
    }

    /// GET: walk the chain under the bucket lock, record the observed
    /// outcome, return the value or "not found".
    pub fn get(&self, key: &Key, rec: &mut Recorder<'_>) -> GetReply {
        let index = self.bucket_index(key);
        rec.write(&BucketRecord { index });

        let guard = self.buckets[index as usize].head.lock();
        let probe = match find(&guard, key) {
            Some(entry) => rec.read(ProbeRecord::hit(entry.val)),
            None => rec.read(ProbeRecord::miss()),
        };

        if probe.is_hit() {
            GetReply::hit(probe.val)
        } else {
            GetReply::miss()
        }
    }

    /// SET: overwrite in place on a hit, prepend a fresh entry on a miss.
    pub fn set(&self, key: &Key, val: &Val, rec: &mut Recorder<'_>) -> ReplyCode {
        let index = self.bucket_index(key);
        rec.write(&BucketRecord { index });

        let mut guard = self.buckets[index as usize].head.lock();
        match find_mut(&mut guard, key) {
            Some(entry) => {
                rec.read(ProbeRecord::hit(entry.val));
                rec.write(&StoredRecord { val: *val });
                entry.val = *val;
                ReplyCode::STORED
            }
            None => {
                rec.read(ProbeRecord::miss());
                rec.write(&StoredRecord { val: *val });
                let head = guard.take();
                *guard = Some(Box::new(Entry {
                    key: *key,
                    val: *val,
                    next: head,
                }));
                ReplyCode::CREATED
            }
        }
    }

    /// DEL: unlink and free the entry on a hit.
    pub fn del(&self, key: &Key, rec: &mut Recorder<'_>) -> ReplyCode {
        let index = self.bucket_index(key);
        rec.write(&BucketRecord { index });

        let mut guard = self.buckets[index as usize].head.lock();
        match unlink(&mut guard, key) {
            Some(entry) => {
                rec.read(ProbeRecord::hit(entry.val));
                ReplyCode::DELETED
            }
            None => {
                rec.read(ProbeRecord::miss());
                ReplyCode::NOT_FOUND
            }
        }
    }

    /// Entries across all buckets. Walks every chain; test/debug use.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| {
                let guard = bucket.head.lock();
                let mut count = 0;
                let mut cur = &*guard;
                while let Some(entry) = cur {
                    count += 1;
                    cur = &entry.next;
                }
                count
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn find<'a>(mut cur: &'a Option<Box<Entry>>, key: &Key) -> Option<&'a Entry> {
    while let Some(entry) = cur {
        if entry.key == *key {
            return Some(entry);
        }
        cur = &entry.next;
    }
    None
}

fn find_mut<'a>(mut cur: &'a mut Option<Box<Entry>>, key: &Key) -> Option<&'a mut Entry> {
    while let Some(entry) = cur {
        if entry.key == *key {
            return Some(&mut **entry);
        }
        cur = &mut entry.next;
    }
    None
}

fn unlink(cur: &mut Option<Box<Entry>>, key: &Key) -> Option<Box<Entry>> {
    let hit = matches!(cur, Some(entry) if entry.key == *key);
    if hit {
        let mut entry = cur.take()?;
        *cur = entry.next.take();
        Some(entry)
    } else {
        match cur {
            Some(entry) => unlink(&mut entry.next, key),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{LogWriter, Recorder, SlabPool};
    use crate::stats::RuntimeStats;
    use std::sync::Arc;

    fn writer() -> LogWriter {
        let stats = Arc::new(RuntimeStats::new());
        LogWriter::new(Arc::new(SlabPool::new(stats)))
    }

    fn with_recorder<T>(f: impl FnOnce(&mut Recorder<'_>) -> T) -> T {
        let mut writer = writer();
        writer.begin_frame();
        let out = f(&mut Recorder::new(&mut writer));
        let handle = writer.commit(None);
        drop(handle);
        out
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let table = HashTable::with_capacity(64);
        with_recorder(|rec| {
            assert_eq!(
                table.set(&Key::new(*b"abcd"), &Val::new(*b"12345678"), rec),
                ReplyCode::CREATED
            );
            let reply = table.get(&Key::new(*b"abcd"), rec);
            assert!(reply.is_hit());
            assert_eq!(reply.val, Val::new(*b"12345678"));
        });
    }

    #[test]
    fn test_set_discriminates_insert_from_update() {
        let table = HashTable::with_capacity(64);
        with_recorder(|rec| {
            let key = Key::new(*b"abcd");
            assert_eq!(table.set(&key, &Val::new(*b"11111111"), rec), ReplyCode::CREATED);
            assert_eq!(table.set(&key, &Val::new(*b"22222222"), rec), ReplyCode::STORED);
            assert_eq!(table.get(&key, rec).val, Val::new(*b"22222222"));
            assert_eq!(table.len(), 1);
        });
    }

    #[test]
    fn test_del_boundary() {
        let table = HashTable::with_capacity(64);
        with_recorder(|rec| {
            let key = Key::new(*b"abcd");
            assert_eq!(table.del(&key, rec), ReplyCode::NOT_FOUND);
            table.set(&key, &Val::new(*b"00000000"), rec);
            assert_eq!(table.del(&key, rec), ReplyCode::DELETED);
            assert_eq!(table.del(&key, rec), ReplyCode::NOT_FOUND);
            assert!(!table.get(&key, rec).is_hit());
        });
    }

    #[test]
    fn test_chain_collisions_keep_unique_keys() {
        // Capacity 1 forces every key into one chain.
        let table = HashTable::with_capacity(1);
        with_recorder(|rec| {
            for i in 0..32u8 {
                let key = Key::new([i, 0, 0, 0]);
                assert_eq!(table.set(&key, &Val::new([i; 8]), rec), ReplyCode::CREATED);
            }
            assert_eq!(table.len(), 32);

            // Middle-of-chain delete.
            assert_eq!(table.del(&Key::new([7, 0, 0, 0]), rec), ReplyCode::DELETED);
            assert_eq!(table.len(), 31);
            assert!(!table.get(&Key::new([7, 0, 0, 0]), rec).is_hit());
            assert!(table.get(&Key::new([6, 0, 0, 0]), rec).is_hit());
            assert!(table.get(&Key::new([8, 0, 0, 0]), rec).is_hit());
        });
    }

    #[test]
    fn test_concurrent_buckets_do_not_interfere() {
        let table = Arc::new(HashTable::with_capacity(256));
        let threads: Vec<_> = (0..4u8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let mut writer = writer();
                    for i in 0..200u8 {
                        writer.begin_frame();
                        let mut rec = Recorder::new(&mut writer);
                        let key = Key::new([t, i, 0, 0]);
                        assert_eq!(
                            table.set(&key, &Val::new([i; 8]), &mut rec),
                            ReplyCode::CREATED
                        );
                        let _ = writer.commit(None);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(table.len(), 800);
    }
}
