//! File-backed event log.

use crate::application::ports::{EventSink, EventSource};
use crate::domain::event::RequestEvent;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only request log shared by the API layer and the sweeper.
///
/// Writers append whole lines under a process-local lock. Readers take the
/// file contents in one read; rotation is left to external tooling.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for FileEventLog {
    fn snapshot(&self) -> io::Result<String> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

impl EventSink for FileEventLog {
    fn append(&self, event: &RequestEvent) -> io::Result<()> {
        let mut line = event.to_line();
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Outcome;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path().join("api.log"));
        assert_eq!(log.snapshot().unwrap(), "");
    }

    #[test]
    fn test_append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path().join("api.log"));
        let event = RequestEvent {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            principal_id: "tok".into(),
            source_address: "192.168.1.5".parse().unwrap(),
            endpoint: "/api/flights".into(),
            outcome: Outcome::Error,
            params: "from=TPE, to=NRT".into(),
        };

        log.append(&event).unwrap();
        log.append(&event).unwrap();

        let text = log.snapshot().unwrap();
        let parsed: Vec<RequestEvent> = text.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(parsed, vec![event.clone(), event]);
    }
}
