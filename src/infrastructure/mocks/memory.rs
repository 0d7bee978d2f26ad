//! In-memory event log, sanction store and journal.

use crate::application::ports::{
    EnforcementJournal, EventSink, EventSource, JournalKind, SanctionStore, StoreError,
};
use crate::domain::event::RequestEvent;
use crate::domain::sanction::SanctionRecord;
use crate::domain::time::LOG_TIMESTAMP_FORMAT;
use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Event log kept as a string, in the same line format as the file log.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    text: Mutex<String>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw line, e.g. a malformed one.
    pub fn push_line(&self, line: &str) {
        let mut text = self.text.lock().expect("event log mutex poisoned");
        text.push_str(line);
        text.push('\n');
    }

    pub fn lines(&self) -> Vec<String> {
        self.text
            .lock()
            .expect("event log mutex poisoned")
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl EventSource for MemoryEventLog {
    fn snapshot(&self) -> io::Result<String> {
        Ok(self.text.lock().expect("event log mutex poisoned").clone())
    }
}

impl EventSink for MemoryEventLog {
    fn append(&self, event: &RequestEvent) -> io::Result<()> {
        self.push_line(&event.to_line());
        Ok(())
    }
}

/// Sanction store with a switchable failure mode.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SanctionRecord>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<SanctionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<SanctionRecord> {
        self.records.lock().expect("store mutex poisoned").clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("injected failure")));
        }
        Ok(())
    }
}

impl SanctionStore for MemoryStore {
    fn load(&self) -> Result<Vec<SanctionRecord>, StoreError> {
        self.check()?;
        Ok(self.records())
    }

    fn save(&self, records: &[SanctionRecord]) -> Result<(), StoreError> {
        self.check()?;
        *self.records.lock().expect("store mutex poisoned") = records.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Journal that keeps rendered lines.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    lines: Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("journal mutex poisoned").clone()
    }
}

impl EnforcementJournal for MemoryJournal {
    fn record(&self, at: DateTime<Utc>, kind: JournalKind, message: &str) -> io::Result<()> {
        self.lines.lock().expect("journal mutex poisoned").push(format!(
            "{} {} {}",
            at.format(LOG_TIMESTAMP_FORMAT),
            kind.tag(),
            message
        ));
        Ok(())
    }
}
