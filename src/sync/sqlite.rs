//! SQLite-backed remote store: one row per (path, index), WAL mode.
//!
//! `replace_all` deletes and rewrites an entity's rows inside a single
//! transaction, so readers never observe a half-replaced list.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use serde_json::{Map, Value};

use crate::core::errors::{Result, TtError};
use crate::status::record::StatusRecord;
use crate::sync::remote::RemoteStore;

pub struct SqliteRemoteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteRemoteStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TtError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }
}

fn index_key(index: usize) -> Result<i64> {
    i64::try_from(index).map_err(|_| TtError::IndexOutOfBounds {
        index,
        len: usize::MAX,
    })
}

impl RemoteStore for SqliteRemoteStore {
    fn write_index(&self, path: &str, index: usize, record: &StatusRecord) -> Result<()> {
        self.conn
            .lock()
            .prepare_cached(
                "INSERT INTO statuses (path, idx, lat, lng, time, power)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path, idx) DO UPDATE SET
                    lat = excluded.lat, lng = excluded.lng,
                    time = excluded.time, power = excluded.power",
            )?
            .execute(params![
                path,
                index_key(index)?,
                record.latitude(),
                record.longitude(),
                record.timestamp(),
                record.power_level(),
            ])?;
        Ok(())
    }

    fn replace_all(&self, path: &str, history: &[StatusRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.prepare_cached("DELETE FROM statuses WHERE path = ?1")?
            .execute(params![path])?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO statuses (path, idx, lat, lng, time, power)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (index, record) in history.iter().enumerate() {
                insert.execute(params![
                    path,
                    index_key(index)?,
                    record.latitude(),
                    record.longitude(),
                    record.timestamp(),
                    record.power_level(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn read_all(&self, path: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT idx, lat, lng, time, power FROM statuses WHERE path = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    StatusRecord::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(None);
        }
        let mut map = Map::with_capacity(rows.len());
        for (index, record) in rows {
            map.insert(index.to_string(), serde_json::to_value(record)?);
        }
        Ok(Some(Value::Object(map)))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[TT-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS statuses (
            path TEXT NOT NULL,
            idx INTEGER NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            time INTEGER NOT NULL,
            power REAL NOT NULL,
            PRIMARY KEY (path, idx)
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::record::decode_snapshot;

    fn temp_store() -> (tempfile::TempDir, SqliteRemoteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRemoteStore::open(&dir.path().join("remote.sqlite3")).unwrap();
        (dir, store)
    }

    fn rec(n: i64) -> StatusRecord {
        #[allow(clippy::cast_precision_loss)]
        let coord = n as f64;
        StatusRecord::new(coord, coord, n, 42.0)
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, store) = temp_store();
        assert!(store.is_wal_mode());
        assert!(store.read_all("transports/none").unwrap().is_none());
    }

    #[test]
    fn replace_then_single_index_update() {
        let (_dir, store) = temp_store();
        store
            .replace_all("transports/bus-7", &[rec(3), rec(2), rec(1)])
            .unwrap();
        store.write_index("transports/bus-7", 0, &rec(4)).unwrap();

        let doc = store.read_all("transports/bus-7").unwrap().unwrap();
        assert_eq!(decode_snapshot(&doc), vec![rec(4), rec(2), rec(1)]);
    }

    #[test]
    fn replace_all_shrinks_list() {
        let (_dir, store) = temp_store();
        store.replace_all("p", &[rec(3), rec(2), rec(1)]).unwrap();
        store.replace_all("p", &[rec(5)]).unwrap();
        let doc = store.read_all("p").unwrap().unwrap();
        assert_eq!(decode_snapshot(&doc), vec![rec(5)]);
    }

    #[test]
    fn paths_are_isolated() {
        let (_dir, store) = temp_store();
        store.replace_all("a", &[rec(1)]).unwrap();
        store.replace_all("b", &[rec(2), rec(3)]).unwrap();
        let a = store.read_all("a").unwrap().unwrap();
        assert_eq!(decode_snapshot(&a), vec![rec(1)]);
    }
}
