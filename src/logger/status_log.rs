//! Plain-text diagnostic log: one line per accepted status record.
//!
//! Nothing reads this file back. Write failures are reported once on stderr
//! and then ignored.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::status::record::StatusRecord;

#[derive(Debug)]
pub struct StatusLog {
    path: Option<PathBuf>,
    warned: bool,
}

impl StatusLog {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            warned: false,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            path: None,
            warned: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append `record` as `<entity> <merged|appended> <record>`.
    pub fn append(&mut self, entity_id: &str, kind: &str, record: &StatusRecord) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let line = format!("{entity_id} {kind} {record}\n");
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path))
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result
            && !self.warned
        {
            eprintln!(
                "[TT-STATUSLOG] cannot append to {}: {error}",
                path.display()
            );
            self.warned = true;
        }
    }
}
