//! SQLite persistence for a [`LogKv`](super::LogKv).
//!
//! Rows go to a `kine` table with the same columns as the in-memory row
//! table; the compaction watermark is a single row in `kine_meta`. Each
//! transaction's rows are inserted in one SQLite transaction, so a failed
//! write leaves nothing behind.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::log::{LogRecord, LogRow};
use crate::error::{KvError, KvResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kine (
    id INTEGER PRIMARY KEY,
    name BLOB NOT NULL,
    created INTEGER NOT NULL,
    deleted INTEGER NOT NULL,
    create_revision INTEGER NOT NULL,
    prev_revision INTEGER NOT NULL,
    version INTEGER NOT NULL,
    value BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS kine_name_index ON kine (name);
CREATE TABLE IF NOT EXISTS kine_meta (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    compact_revision INTEGER NOT NULL,
    current_revision INTEGER NOT NULL
);
";

const INSERT_ROW: &str = "INSERT INTO kine
    (id, name, created, deleted, create_revision, prev_revision, version, value)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const UPSERT_META: &str = "INSERT INTO kine_meta (id, compact_revision, current_revision)
    VALUES (0, ?1, ?2)
    ON CONFLICT(id) DO UPDATE SET
        compact_revision = excluded.compact_revision,
        current_revision = excluded.current_revision";

/// Row table kept in a SQLite database.
pub struct SqliteLog {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteLog {
    /// Open (or create) the database at `path` and read back its rows,
    /// preceded by the compaction watermark if one was recorded.
    pub fn open(path: &Path) -> KvResult<(Self, Vec<LogRecord>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let mut records = Vec::new();
        let meta: Option<(i64, i64)> = conn
            .query_row(
                "SELECT compact_revision, current_revision FROM kine_meta WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((revision, current)) = meta {
            records.push(LogRecord::Compact { revision, current });
        }
        {
            let mut select = conn.prepare(
                "SELECT id, name, created, deleted, create_revision, prev_revision, version, value
                 FROM kine ORDER BY id",
            )?;
            let rows = select.query_map([], |row| {
                Ok(LogRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created: row.get(2)?,
                    deleted: row.get(3)?,
                    create_revision: row.get(4)?,
                    prev_revision: row.get(5)?,
                    version: row.get(6)?,
                    value: row.get(7)?,
                })
            })?;
            for row in rows {
                records.push(LogRecord::Row(row?));
            }
        }
        debug!(path = %path.display(), records = records.len(), "sqlite rows loaded");

        Ok((
            Self {
                path: path.to_path_buf(),
                conn: Mutex::new(conn),
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&mut self, records: &[LogRecord]) -> KvResult<()> {
        let conn = self.conn.get_mut().map_err(|_| KvError::Poisoned)?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(INSERT_ROW)?;
            for record in records {
                if let LogRecord::Row(row) = record {
                    insert.execute(params![
                        row.id,
                        row.name,
                        row.created,
                        row.deleted,
                        row.create_revision,
                        row.prev_revision,
                        row.version,
                        row.value,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn compact(&mut self, revision: i64, current: i64, doomed: &HashSet<i64>) -> KvResult<()> {
        let conn = self.conn.get_mut().map_err(|_| KvError::Poisoned)?;
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare_cached("DELETE FROM kine WHERE id = ?1")?;
            for id in doomed {
                delete.execute(params![*id])?;
            }
        }
        tx.execute(UPSERT_META, params![revision, current])?;
        tx.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLog").field("path", &self.path).finish()
    }
}
