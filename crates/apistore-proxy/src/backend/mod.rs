//! Key-value datastore contract.
//!
//! Models the subset of the etcd v3 KV API that a generic API-server
//! registry relies on: point and range reads, single-key compare-and-swap
//! transactions, and compaction. Every write bumps a store-wide revision.

pub mod log;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};
use crate::wire;

pub use log::{LogFile, LogKv, LogRecord, LogRow};
pub use sqlite::SqliteLog;

/// A live key with its revision metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(with = "wire::b64")]
    pub key: Vec<u8>,
    #[serde(with = "wire::int64")]
    pub create_revision: i64,
    #[serde(with = "wire::int64")]
    pub mod_revision: i64,
    /// Writes since the key was (re)created; 1 after the first put.
    #[serde(with = "wire::int64")]
    pub version: i64,
    #[serde(with = "wire::b64")]
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    /// Keys in range, before `limit` was applied.
    pub count: i64,
    pub more: bool,
    pub revision: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutResult {
    pub revision: i64,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub revision: i64,
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

/// What a [`Compare`] inspects. A missing key has version, create and mod
/// revision 0 and matches no value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareTarget {
    Version(i64),
    Create(i64),
    Mod(i64),
    Value(Vec<u8>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareResult {
    #[default]
    Equal,
    NotEqual,
    Greater,
    Less,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compare {
    pub key: Vec<u8>,
    pub target: CompareTarget,
    pub result: CompareResult,
}

impl Compare {
    pub fn new(key: impl Into<Vec<u8>>, target: CompareTarget, result: CompareResult) -> Self {
        Self {
            key: key.into(),
            target,
            result,
        }
    }

    /// Evaluate against the current state of `self.key`.
    pub fn matches(&self, current: Option<&KeyValue>) -> bool {
        use std::cmp::Ordering;

        let ordering = match (&self.target, current) {
            (CompareTarget::Version(v), kv) => kv.map_or(0, |kv| kv.version).cmp(v),
            (CompareTarget::Create(v), kv) => kv.map_or(0, |kv| kv.create_revision).cmp(v),
            (CompareTarget::Mod(v), kv) => kv.map_or(0, |kv| kv.mod_revision).cmp(v),
            (CompareTarget::Value(v), Some(kv)) => kv.value.as_slice().cmp(v.as_slice()),
            (CompareTarget::Value(_), None) => return false,
        };
        match self.result {
            CompareResult::Equal => ordering == Ordering::Equal,
            CompareResult::NotEqual => ordering != Ordering::Equal,
            CompareResult::Greater => ordering == Ordering::Greater,
            CompareResult::Less => ordering == Ordering::Less,
        }
    }
}

/// One operation inside a transaction branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxnOp {
    Range {
        key: Vec<u8>,
        range_end: Option<Vec<u8>>,
        limit: usize,
    },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    DeleteRange {
        key: Vec<u8>,
        range_end: Option<Vec<u8>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxnOpResult {
    Range(RangeResult),
    Put(PutResult),
    DeleteRange(DeleteResult),
}

/// `if compare... then success... else failure...`, applied atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Txn {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: Compare) -> Self {
        self.compare.push(compare);
        self
    }

    pub fn and_then(mut self, op: TxnOp) -> Self {
        self.success.push(op);
        self
    }

    pub fn or_else(mut self, op: TxnOp) -> Self {
        self.failure.push(op);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxnResult {
    pub succeeded: bool,
    pub revision: i64,
    pub responses: Vec<TxnOpResult>,
}

/// The end of the key range covering every key that starts with `prefix`.
///
/// An all-`0xff` (or empty) prefix yields `[0]`, etcd's "to the end of the
/// keyspace" marker.
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

/// Whether `key` falls in `[start, range_end)` with etcd's conventions:
/// no end means exactly `start`, an end of `[0]` means everything from
/// `start` on.
pub fn in_range(key: &[u8], start: &[u8], range_end: Option<&[u8]>) -> bool {
    match range_end {
        None => key == start,
        Some([0]) => key >= start,
        Some(end) => key >= start && key < end,
    }
}

/// A revisioned key-value datastore.
pub trait KvBackend: Send + Sync {
    /// Revision of the most recent write.
    fn revision(&self) -> KvResult<i64>;

    /// Live keys in `[key, range_end)`. `limit == 0` means no limit.
    fn range(&self, key: &[u8], range_end: Option<&[u8]>, limit: usize) -> KvResult<RangeResult>;

    fn txn(&self, txn: Txn) -> KvResult<TxnResult>;

    /// Discard history superseded at or before `revision`. Returns the new
    /// compacted revision.
    fn compact(&self, revision: i64) -> KvResult<i64>;

    fn get(&self, key: &[u8]) -> KvResult<Option<KeyValue>> {
        Ok(self.range(key, None, 1)?.kvs.into_iter().next())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<PutResult> {
        let result = self.txn(Txn::new().and_then(TxnOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }))?;
        match result.responses.into_iter().next() {
            Some(TxnOpResult::Put(put)) => Ok(put),
            other => Err(KvError::UnexpectedResponse(format!("put answered with {other:?}"))),
        }
    }

    fn delete_range(&self, key: &[u8], range_end: Option<&[u8]>) -> KvResult<DeleteResult> {
        let result = self.txn(Txn::new().and_then(TxnOp::DeleteRange {
            key: key.to_vec(),
            range_end: range_end.map(<[u8]>::to_vec),
        }))?;
        match result.responses.into_iter().next() {
            Some(TxnOpResult::DeleteRange(deleted)) => Ok(deleted),
            other => Err(KvError::UnexpectedResponse(format!("delete answered with {other:?}"))),
        }
    }

    /// Put `key` only if it does not exist. Returns the write revision, or
    /// `None` when the key was already present.
    fn create(&self, key: &[u8], value: &[u8]) -> KvResult<Option<i64>> {
        let result = self.txn(
            Txn::new()
                .when(Compare::new(key, CompareTarget::Create(0), CompareResult::Equal))
                .and_then(TxnOp::Put {
                    key: key.to_vec(),
                    value: value.to_vec(),
                }),
        )?;
        Ok(result.succeeded.then_some(result.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(version: i64, create: i64, modified: i64, value: &[u8]) -> KeyValue {
        KeyValue {
            key: b"k".to_vec(),
            create_revision: create,
            mod_revision: modified,
            version,
            value: value.to_vec(),
        }
    }

    #[test]
    fn prefix_end() {
        assert_eq!(prefix_range_end(b"/a/"), b"/a0".to_vec());
        assert_eq!(prefix_range_end(&[b'a', 0xff]), b"b".to_vec());
        assert_eq!(prefix_range_end(&[0xff, 0xff]), vec![0]);
        assert_eq!(prefix_range_end(b""), vec![0]);
    }

    #[test]
    fn range_membership() {
        assert!(in_range(b"a", b"a", None));
        assert!(!in_range(b"ab", b"a", None));
        assert!(in_range(b"ab", b"a", Some(b"b")));
        assert!(!in_range(b"b", b"a", Some(b"b")));
        assert!(in_range(b"zzz", b"a", Some(&[0])));
    }

    #[test]
    fn compare_missing_key() {
        let create_zero = Compare::new("k", CompareTarget::Create(0), CompareResult::Equal);
        assert!(create_zero.matches(None));
        assert!(!create_zero.matches(Some(&kv(1, 5, 5, b"v"))));

        let value = Compare::new("k", CompareTarget::Value(b"v".to_vec()), CompareResult::NotEqual);
        assert!(!value.matches(None));
    }

    #[test]
    fn compare_orderings() {
        let current = kv(3, 2, 9, b"m");
        assert!(Compare::new("k", CompareTarget::Mod(9), CompareResult::Equal).matches(Some(&current)));
        assert!(Compare::new("k", CompareTarget::Mod(4), CompareResult::Greater).matches(Some(&current)));
        assert!(Compare::new("k", CompareTarget::Version(4), CompareResult::Less).matches(Some(&current)));
        assert!(Compare::new("k", CompareTarget::Value(b"a".to_vec()), CompareResult::Greater).matches(Some(&current)));
        assert!(!Compare::new("k", CompareTarget::Create(2), CompareResult::NotEqual).matches(Some(&current)));
    }
}
