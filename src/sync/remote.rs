//! Remote store abstraction and the in-process and file-backed stores.
//!
//! A remote path (`<base_path><entity_id>`) addresses one entity's status
//! list. Every store keeps that list in the wire shape: an object keyed by
//! stringified index.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};

use crate::core::errors::{Result, TtError};
use crate::status::record::{StatusRecord, encode_history};

const ENTITY_ID_PATTERN: &str = r"^[A-Za-z0-9_.\-]{1,64}$";

/// Reject entity ids that can't safely address a remote path.
pub fn validate_entity_id(entity_id: &str) -> Result<()> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(ENTITY_ID_PATTERN))
        .as_ref()
        .map_err(|error| TtError::Runtime {
            details: format!("entity id pattern failed to compile: {error}"),
        })?;

    if !pattern.is_match(entity_id) {
        return Err(TtError::InvalidEntityId {
            entity_id: entity_id.to_string(),
            reason: "expected 1-64 characters of [A-Za-z0-9_.-]".to_string(),
        });
    }
    if entity_id == "." || entity_id == ".." {
        return Err(TtError::InvalidEntityId {
            entity_id: entity_id.to_string(),
            reason: "relative path component".to_string(),
        });
    }
    Ok(())
}

/// Addressable store of per-entity status lists.
pub trait RemoteStore: Send + Sync {
    /// Overwrite a single index of the list at `path`.
    fn write_index(&self, path: &str, index: usize, record: &StatusRecord) -> Result<()>;

    /// Replace the whole list at `path`; indices beyond `history` vanish.
    fn replace_all(&self, path: &str, history: &[StatusRecord]) -> Result<()>;

    /// Raw wire document at `path`, `None` when nothing is stored.
    fn read_all(&self, path: &str) -> Result<Option<Value>>;

    fn describe(&self) -> String;
}

// ──────────────────── memory ────────────────────

/// One write accepted by a [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteWrite {
    Index { path: String, index: usize },
    All { path: String, len: usize },
}

/// In-process store. Records every accepted write for inspection.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<String, Map<String, Value>>>,
    writes: Mutex<Vec<RemoteWrite>>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document, bypassing the write log.
    pub fn seed(&self, path: &str, document: Value) {
        let mut docs = self.documents.lock();
        match document {
            Value::Object(map) => {
                docs.insert(path.to_string(), map);
            }
            _ => {
                docs.remove(path);
            }
        }
    }

    #[must_use]
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn write_index(&self, path: &str, index: usize, record: &StatusRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.documents
            .lock()
            .entry(path.to_string())
            .or_default()
            .insert(index.to_string(), value);
        self.writes.lock().push(RemoteWrite::Index {
            path: path.to_string(),
            index,
        });
        Ok(())
    }

    fn replace_all(&self, path: &str, history: &[StatusRecord]) -> Result<()> {
        let Value::Object(map) = encode_history(history)? else {
            return Err(TtError::remote(path, "encoded history is not an object"));
        };
        self.documents.lock().insert(path.to_string(), map);
        self.writes.lock().push(RemoteWrite::All {
            path: path.to_string(),
            len: history.len(),
        });
        Ok(())
    }

    fn read_all(&self, path: &str) -> Result<Option<Value>> {
        Ok(self
            .documents
            .lock()
            .get(path)
            .map(|map| Value::Object(map.clone())))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ──────────────────── file ────────────────────

/// One pretty-printed JSON document per remote path under `root`.
#[derive(Debug)]
pub struct FileRemoteStore {
    root: PathBuf,
    // Serializes read-modify-write of single-index updates.
    write_lock: Mutex<()>,
}

impl FileRemoteStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto a file below `root`.
    pub fn file_for(&self, path: &str) -> Result<PathBuf> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(TtError::remote(path, "empty remote path"));
        };
        for segment in &segments {
            let mut parts = Path::new(segment).components();
            let is_plain =
                matches!(parts.next(), Some(Component::Normal(_))) && parts.next().is_none();
            if !is_plain {
                return Err(TtError::remote(path, format!("unsafe path segment {segment:?}")));
            }
        }
        let mut file = self.root.clone();
        file.extend(parents);
        file.push(format!("{last}.json"));
        Ok(file)
    }

    fn load(&self, file: &Path) -> Result<Map<String, Value>> {
        if !file.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(file).map_err(|source| TtError::io(file, source))?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(error) => Err(TtError::remote(
                &file.display().to_string(),
                format!("corrupt document: {error}"),
            )),
        }
    }

    /// Atomic replace via tmp + rename.
    fn store(file: &Path, document: &Value) -> Result<()> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|source| TtError::io(parent, source))?;
        }
        let tmp = file.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(document)?;
        fs::write(&tmp, data).map_err(|source| TtError::io(&tmp, source))?;
        fs::rename(&tmp, file).map_err(|source| TtError::io(file, source))?;
        Ok(())
    }
}

impl RemoteStore for FileRemoteStore {
    fn write_index(&self, path: &str, index: usize, record: &StatusRecord) -> Result<()> {
        let file = self.file_for(path)?;
        let _guard = self.write_lock.lock();
        let mut map = self.load(&file)?;
        map.insert(index.to_string(), serde_json::to_value(record)?);
        Self::store(&file, &Value::Object(map))
    }

    fn replace_all(&self, path: &str, history: &[StatusRecord]) -> Result<()> {
        let file = self.file_for(path)?;
        let document = encode_history(history)?;
        let _guard = self.write_lock.lock();
        Self::store(&file, &document)
    }

    fn read_all(&self, path: &str) -> Result<Option<Value>> {
        let file = self.file_for(path)?;
        if !file.exists() {
            return Ok(None);
        }
        self.load(&file).map(|map| Some(Value::Object(map)))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::record::decode_snapshot;

    fn rec(n: i64) -> StatusRecord {
        #[allow(clippy::cast_precision_loss)]
        let coord = n as f64;
        StatusRecord::new(coord, coord, n, 80.0)
    }

    #[test]
    fn entity_id_validation() {
        for ok in ["bus-7", "TRUCK_01", "a", "van.3"] {
            assert!(validate_entity_id(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "a/b", "..", ".", "bus 7", &"x".repeat(65), "ünicode"] {
            let err = validate_entity_id(bad).expect_err(bad);
            assert_eq!(err.code(), "TT-1101");
        }
    }

    #[test]
    fn memory_store_tracks_writes_and_documents() {
        let store = MemoryRemoteStore::new();
        store.replace_all("transports/bus-7", &[rec(2), rec(1)]).unwrap();
        store.write_index("transports/bus-7", 0, &rec(3)).unwrap();

        let doc = store.read_all("transports/bus-7").unwrap().unwrap();
        let history = decode_snapshot(&doc);
        assert_eq!(history, vec![rec(3), rec(1)]);
        assert_eq!(
            store.writes(),
            vec![
                RemoteWrite::All {
                    path: "transports/bus-7".to_string(),
                    len: 2
                },
                RemoteWrite::Index {
                    path: "transports/bus-7".to_string(),
                    index: 0
                },
            ]
        );
        assert!(store.read_all("transports/other").unwrap().is_none());
    }

    #[test]
    fn replace_all_drops_stale_indices() {
        let store = MemoryRemoteStore::new();
        store.replace_all("p", &[rec(3), rec(2), rec(1)]).unwrap();
        store.replace_all("p", &[rec(4)]).unwrap();
        let doc = store.read_all("p").unwrap().unwrap();
        assert_eq!(doc.as_object().map(Map::len), Some(1));
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRemoteStore::new(dir.path().to_path_buf());
        assert!(store.read_all("transports/bus-7").unwrap().is_none());

        store.replace_all("transports/bus-7", &[rec(2), rec(1)]).unwrap();
        store.write_index("transports/bus-7", 0, &rec(5)).unwrap();

        let file = dir.path().join("transports").join("bus-7.json");
        assert!(file.exists());
        assert!(!file.with_extension("json.tmp").exists());

        let doc = store.read_all("transports/bus-7").unwrap().unwrap();
        assert_eq!(decode_snapshot(&doc), vec![rec(5), rec(1)]);
    }

    #[test]
    fn file_store_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRemoteStore::new(dir.path().to_path_buf());
        assert!(store.file_for("../etc/passwd").is_err());
        assert!(store.file_for("transports/..").is_err());
        assert!(store.file_for("//").is_err());
        assert_eq!(
            store.file_for("transports//van.3").unwrap(),
            dir.path().join("transports").join("van.3.json")
        );
    }

    #[test]
    fn file_store_corrupt_document_is_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRemoteStore::new(dir.path().to_path_buf());
        let file = store.file_for("t/bus").unwrap();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "{not json").unwrap();
        assert_eq!(store.read_all("t/bus").unwrap_err().code(), "TT-3004");
    }
}
