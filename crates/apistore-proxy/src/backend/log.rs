//! Log-structured key-value datastore.
//!
//! State is an append-only table of rows, one per write, in the shape a
//! SQL-backed etcd shim keeps:
//!
//! ```text
//! id | name | created | deleted | create_revision | prev_revision | version | value
//! ```
//!
//! `id` is the revision of the write. A key's current value is its newest
//! row; a delete appends a tombstone. Compaction drops rows that were
//! superseded at or before the compaction revision.
//!
//! With a [`LogFile`] attached, every row is appended to disk before it
//! becomes visible. Each line is framed with a CRC32:
//!
//! ```text
//! <crc32 as 8 hex digits> <record as JSON>\n
//! ```
//!
//! On open the file is replayed front-to-back. A torn final line (crash
//! mid-append) is logged and truncated away; a damaged line anywhere else
//! fails the open. An append that fails is cut back off the file before the
//! error is returned, so a failed write never leaves a partial line behind
//! later ones.
//!
//! The same rows can instead live in a SQLite table, see
//! [`SqliteLog`](super::sqlite::SqliteLog).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sqlite::SqliteLog;
use super::{
    in_range, DeleteResult, KeyValue, KvBackend, PutResult, RangeResult, Txn, TxnOp, TxnOpResult,
    TxnResult,
};
use crate::error::{KvError, KvResult};
use crate::wire;

/// One write in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    pub id: i64,
    #[serde(with = "wire::b64")]
    pub name: Vec<u8>,
    pub created: bool,
    pub deleted: bool,
    pub create_revision: i64,
    pub prev_revision: i64,
    pub version: i64,
    #[serde(with = "wire::b64")]
    pub value: Vec<u8>,
}

impl LogRow {
    fn key_value(&self) -> KeyValue {
        KeyValue {
            key: self.name.clone(),
            create_revision: self.create_revision,
            mod_revision: self.id,
            version: self.version,
            value: self.value.clone(),
        }
    }
}

/// A line in a [`LogFile`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Row(LogRow),
    /// Written at the head of a compacted log.
    Compact { revision: i64, current: i64 },
}

fn encode_line(record: &LogRecord, out: &mut Vec<u8>) -> KvResult<()> {
    let json = serde_json::to_vec(record).map_err(|e| KvError::Serialization(e.to_string()))?;
    out.extend_from_slice(format!("{:08x} ", crc32fast::hash(&json)).as_bytes());
    out.extend_from_slice(&json);
    out.push(b'\n');
    Ok(())
}

fn decode_line(line: &[u8]) -> Result<LogRecord, String> {
    let split = line
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| "missing checksum".to_string())?;
    let (crc, json) = (&line[..split], &line[split + 1..]);
    let expected = std::str::from_utf8(crc)
        .ok()
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .ok_or_else(|| "malformed checksum".to_string())?;
    let actual = crc32fast::hash(json);
    if actual != expected {
        return Err(format!("checksum mismatch: expected {expected:08x}, found {actual:08x}"));
    }
    serde_json::from_slice(json).map_err(|e| e.to_string())
}

/// Append-only file sink for a [`LogKv`].
pub struct LogFile {
    path: PathBuf,
    file: File,
    sync: bool,
    /// Set when a failed append could not be cut back off the file.
    failed: bool,
}

impl LogFile {
    /// Open (or create) the log at `path` and replay it.
    ///
    /// With `sync`, every append is flushed to stable storage before the
    /// write is acknowledged.
    pub fn open(path: &Path, sync: bool) -> KvResult<(Self, Vec<LogRecord>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut valid_len = 0;
        for (index, chunk) in data.split_inclusive(|b| *b == b'\n').enumerate() {
            let line = index + 1;
            let is_last = valid_len + chunk.len() == data.len();
            let parsed = match chunk.strip_suffix(b"\n") {
                Some(body) => decode_line(body),
                None => Err("missing line terminator".to_string()),
            };
            match parsed {
                Ok(record) => {
                    records.push(record);
                    valid_len += chunk.len();
                }
                Err(reason) if is_last => {
                    warn!(path = %path.display(), line, %reason, "torn log tail; truncating");
                    break;
                }
                Err(reason) => return Err(KvError::CorruptLog { line, reason }),
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if (valid_len as u64) < file.metadata()?.len() {
            file.set_len(valid_len as u64)?;
        }
        debug!(path = %path.display(), records = records.len(), "log replayed");

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                sync,
                failed: false,
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, records: &[LogRecord]) -> KvResult<()> {
        if self.failed {
            return Err(KvError::Io(io::Error::other(format!(
                "log {} holds a partial append; reopen to recover",
                self.path.display()
            ))));
        }
        let mut buf = Vec::new();
        for record in records {
            encode_line(record, &mut buf)?;
        }

        let start = self.file.metadata()?.len();
        let written = self.file.write_all(&buf).and_then(|()| {
            if self.sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(err) = written {
            if let Err(rollback) = self.truncate(start) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to cut back partial append; refusing further writes"
                );
                self.failed = true;
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Atomically replace the whole log.
    fn rewrite(&mut self, records: &[LogRecord]) -> KvResult<()> {
        let mut buf = Vec::new();
        for record in records {
            encode_line(record, &mut buf)?;
        }
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| KvError::Io(e.error))?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("failed", &self.failed)
            .finish()
    }
}

/// Where committed rows are persisted.
#[derive(Debug, Default)]
enum Sink {
    #[default]
    Memory,
    File(LogFile),
    Sqlite(SqliteLog),
}

impl Sink {
    fn append(&mut self, records: &[LogRecord]) -> KvResult<()> {
        match self {
            Self::Memory => Ok(()),
            Self::File(file) => file.append(records),
            Self::Sqlite(db) => db.append(records),
        }
    }

    fn compact(
        &mut self,
        revision: i64,
        current: i64,
        rows: &BTreeMap<i64, LogRow>,
        doomed: &HashSet<i64>,
    ) -> KvResult<()> {
        match self {
            Self::Memory => Ok(()),
            Self::File(file) => {
                let mut survivors = vec![LogRecord::Compact { revision, current }];
                survivors.extend(
                    rows.values()
                        .filter(|row| !doomed.contains(&row.id))
                        .cloned()
                        .map(LogRecord::Row),
                );
                file.rewrite(&survivors)
            }
            Self::Sqlite(db) => db.compact(revision, current, doomed),
        }
    }
}

#[derive(Default)]
struct LogState {
    rows: BTreeMap<i64, LogRow>,
    /// Live keys to the id of their newest row.
    live: BTreeMap<Vec<u8>, i64>,
    revision: i64,
    compacted: i64,
    sink: Sink,
}

impl LogState {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Row(row) => {
                if row.deleted {
                    self.live.remove(&row.name);
                } else {
                    self.live.insert(row.name.clone(), row.id);
                }
                self.revision = self.revision.max(row.id);
                self.rows.insert(row.id, row);
            }
            LogRecord::Compact { revision, current } => {
                self.compacted = self.compacted.max(revision);
                self.revision = self.revision.max(current);
            }
        }
    }

    fn current(&self, pending: &BTreeMap<Vec<u8>, LogRow>, key: &[u8]) -> Option<KeyValue> {
        match pending.get(key) {
            Some(row) if row.deleted => None,
            Some(row) => Some(row.key_value()),
            None => self
                .live
                .get(key)
                .and_then(|id| self.rows.get(id))
                .map(LogRow::key_value),
        }
    }

    /// Range over committed state overlaid with the writes staged so far in
    /// the current transaction.
    fn range(
        &self,
        pending: &BTreeMap<Vec<u8>, LogRow>,
        key: &[u8],
        range_end: Option<&[u8]>,
        limit: usize,
        revision: i64,
    ) -> RangeResult {
        let upper = match range_end {
            None => Bound::Included(key),
            Some([0]) => Bound::Unbounded,
            Some(end) if end <= key => Bound::Excluded(key),
            Some(end) => Bound::Excluded(end),
        };
        let mut merged: BTreeMap<&[u8], &LogRow> = BTreeMap::new();
        for (name, id) in self.live.range::<[u8], _>((Bound::Included(key), upper)) {
            if let Some(row) = self.rows.get(id) {
                merged.insert(name.as_slice(), row);
            }
        }
        for (name, row) in pending {
            if !in_range(name, key, range_end) {
                continue;
            }
            if row.deleted {
                merged.remove(name.as_slice());
            } else {
                merged.insert(name.as_slice(), row);
            }
        }

        let count = merged.len();
        let take = if limit == 0 { count } else { limit.min(count) };
        RangeResult {
            kvs: merged.values().take(take).map(|row| row.key_value()).collect(),
            count: count as i64,
            more: take < count,
            revision,
        }
    }
}

/// Log-structured datastore, in memory or backed by a [`LogFile`] or a
/// [`SqliteLog`].
///
/// All writes are serialized under one lock.
pub struct LogKv {
    state: RwLock<LogState>,
}

impl LogKv {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
        }
    }

    /// Open a durable datastore persisted to the log file at `path`.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> KvResult<Self> {
        let (file, records) = LogFile::open(path.as_ref(), sync)?;
        Ok(Self::from_sink(Sink::File(file), records))
    }

    /// Open a durable datastore persisted to the SQLite database at `path`.
    pub fn open_sqlite(path: impl AsRef<Path>) -> KvResult<Self> {
        let (db, records) = SqliteLog::open(path.as_ref())?;
        Ok(Self::from_sink(Sink::Sqlite(db), records))
    }

    fn from_sink(sink: Sink, records: Vec<LogRecord>) -> Self {
        let mut state = LogState::default();
        for record in records {
            state.apply(record);
        }
        info!(
            sink = ?sink,
            revision = state.revision,
            keys = state.live.len(),
            "datastore opened"
        );
        state.sink = sink;
        Self {
            state: RwLock::new(state),
        }
    }

    /// Revision through which history has been compacted.
    pub fn compacted_revision(&self) -> KvResult<i64> {
        Ok(self.read()?.compacted)
    }

    /// Every retained row for `key`, oldest first.
    pub fn history(&self, key: &[u8]) -> KvResult<Vec<LogRow>> {
        Ok(self
            .read()?
            .rows
            .values()
            .filter(|row| row.name == key)
            .cloned()
            .collect())
    }

    fn read(&self) -> KvResult<RwLockReadGuard<'_, LogState>> {
        self.state.read().map_err(|_| KvError::Poisoned)
    }

    fn write(&self) -> KvResult<RwLockWriteGuard<'_, LogState>> {
        self.state.write().map_err(|_| KvError::Poisoned)
    }
}

impl Default for LogKv {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl KvBackend for LogKv {
    fn revision(&self) -> KvResult<i64> {
        Ok(self.read()?.revision)
    }

    fn range(&self, key: &[u8], range_end: Option<&[u8]>, limit: usize) -> KvResult<RangeResult> {
        let state = self.read()?;
        Ok(state.range(&BTreeMap::new(), key, range_end, limit, state.revision))
    }

    fn txn(&self, txn: Txn) -> KvResult<TxnResult> {
        let mut state = self.write()?;
        let empty = BTreeMap::new();
        let succeeded = txn
            .compare
            .iter()
            .all(|cmp| cmp.matches(state.current(&empty, &cmp.key).as_ref()));
        let ops = if succeeded { txn.success } else { txn.failure };

        let mut pending: BTreeMap<Vec<u8>, LogRow> = BTreeMap::new();
        let mut staged: Vec<LogRecord> = Vec::new();
        let mut responses = Vec::with_capacity(ops.len());
        let mut revision = state.revision;

        for op in ops {
            match op {
                TxnOp::Range { key, range_end, limit } => {
                    let result = state.range(&pending, &key, range_end.as_deref(), limit, revision);
                    responses.push(TxnOpResult::Range(result));
                }
                TxnOp::Put { key, value } => {
                    let prev = state.current(&pending, &key);
                    revision += 1;
                    let row = LogRow {
                        id: revision,
                        name: key.clone(),
                        created: prev.is_none(),
                        deleted: false,
                        create_revision: prev.as_ref().map_or(revision, |kv| kv.create_revision),
                        prev_revision: prev.as_ref().map_or(0, |kv| kv.mod_revision),
                        version: prev.as_ref().map_or(1, |kv| kv.version + 1),
                        value,
                    };
                    staged.push(LogRecord::Row(row.clone()));
                    pending.insert(key, row);
                    responses.push(TxnOpResult::Put(PutResult { revision, prev_kv: prev }));
                }
                TxnOp::DeleteRange { key, range_end } => {
                    let doomed = state.range(&pending, &key, range_end.as_deref(), 0, revision).kvs;
                    for kv in &doomed {
                        revision += 1;
                        let row = LogRow {
                            id: revision,
                            name: kv.key.clone(),
                            created: false,
                            deleted: true,
                            create_revision: kv.create_revision,
                            prev_revision: kv.mod_revision,
                            version: 0,
                            value: kv.value.clone(),
                        };
                        staged.push(LogRecord::Row(row.clone()));
                        pending.insert(kv.key.clone(), row);
                    }
                    responses.push(TxnOpResult::DeleteRange(DeleteResult {
                        revision,
                        deleted: doomed.len() as i64,
                        prev_kvs: doomed,
                    }));
                }
            }
        }

        if !staged.is_empty() {
            state.sink.append(&staged)?;
            for record in staged {
                state.apply(record);
            }
            debug!(revision = state.revision, succeeded, "txn committed");
        }

        Ok(TxnResult {
            succeeded,
            revision: state.revision,
            responses,
        })
    }

    fn compact(&self, revision: i64) -> KvResult<i64> {
        let mut state = self.write()?;
        if revision > state.revision {
            return Err(KvError::FutureRevision {
                requested: revision,
                current: state.revision,
            });
        }
        if revision <= state.compacted {
            return Err(KvError::Compacted {
                requested: revision,
                compacted: state.compacted,
            });
        }

        let doomed: HashSet<i64> = {
            let mut newest: HashMap<&[u8], i64> = HashMap::new();
            for row in state.rows.range(..=revision).map(|(_, row)| row) {
                newest.insert(row.name.as_slice(), row.id);
            }
            state
                .rows
                .range(..=revision)
                .filter(|(id, row)| row.deleted || newest.get(row.name.as_slice()) != Some(*id))
                .map(|(id, _)| *id)
                .collect()
        };

        let current = state.revision;
        let LogState { rows, sink, .. } = &mut *state;
        sink.compact(revision, current, rows, &doomed)?;

        state.rows.retain(|id, _| !doomed.contains(id));
        state.compacted = revision;
        info!(revision, removed = doomed.len(), "datastore compacted");
        Ok(revision)
    }
}

impl std::fmt::Debug for LogKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.read() {
            Ok(state) => f
                .debug_struct("LogKv")
                .field("revision", &state.revision)
                .field("keys", &state.live.len())
                .field("sink", &state.sink)
                .finish(),
            Err(_) => f.debug_struct("LogKv").finish_non_exhaustive(),
        }
    }
}
