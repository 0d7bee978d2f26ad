//! Enforcement journal file.

use crate::application::ports::{EnforcementJournal, JournalKind};
use crate::domain::time::LOG_TIMESTAMP_FORMAT;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Appends `TIMESTAMP [BLOCKED] ...` and `TIMESTAMP [UNBLOCKED] ...` lines.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl EnforcementJournal for FileJournal {
    fn record(&self, at: DateTime<Utc>, kind: JournalKind, message: &str) -> io::Result<()> {
        let line = format!("{} {} {}\n", at.format(LOG_TIMESTAMP_FORMAT), kind.tag(), message);
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())
    }
}
