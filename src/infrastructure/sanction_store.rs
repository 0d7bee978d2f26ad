//! JSON file sanction store, and a read-only view of it for the request path.

use crate::application::ports::{SanctionLookup, SanctionStore, StoreError};
use crate::domain::principal::Principal;
use crate::domain::sanction::{EnforcementAction, SanctionRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// Keeps sanction records as a pretty-printed JSON list.
///
/// Saves go to a sibling temp file that is synced and renamed over the
/// target, so a crash leaves either the old or the new list.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SanctionStore for JsonFileStore {
    fn load(&self) -> Result<Vec<SanctionRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, records: &[SanctionRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(records)?;

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    // (mtime, size) of the file the records came from
    stamp: Option<(SystemTime, u64)>,
    records: HashMap<EnforcementAction, SanctionRecord>,
}

/// Sanctions as last written to a [`JsonFileStore`] by another process.
///
/// For an API process whose engine runs in a separate sweep daemon. The
/// file is re-read when its modification time or size changes, so a
/// sanction reaches the request path on the first lookup after the daemon
/// saves it, and disappears once the daemon has reverted it. If a reload
/// fails the previous snapshot stays in force.
#[derive(Debug)]
pub struct StoredSanctions {
    store: JsonFileStore,
    cache: RwLock<Snapshot>,
}

impl StoredSanctions {
    pub fn new(store: JsonFileStore) -> Self {
        Self {
            store,
            cache: RwLock::new(Snapshot::default()),
        }
    }

    /// Re-read the file if it changed since the last load.
    pub fn refresh(&self) -> Result<(), StoreError> {
        let stamp = match fs::metadata(self.store.path()) {
            Ok(meta) => Some((meta.modified()?, meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if cache.stamp == stamp && stamp.is_some() {
                return Ok(());
            }
        }

        let mut records = HashMap::new();
        if stamp.is_some() {
            for record in self.store.load()? {
                records.entry(record.action()).or_insert(record);
            }
        }

        tracing::debug!(path = %self.store.path().display(), records = records.len(), "sanctions reloaded");
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Snapshot { stamp, records };
        Ok(())
    }
}

impl SanctionLookup for StoredSanctions {
    fn remaining(&self, principal: &Principal, address: Option<IpAddr>, now: DateTime<Utc>) -> Option<Duration> {
        if let Err(e) = self.refresh() {
            tracing::warn!(path = %self.store.path().display(), error = %e, "sanction reload failed; using last snapshot");
        }

        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        EnforcementAction::covering(&principal.account, address)
            .iter()
            .filter_map(|key| cache.records.get(key))
            .filter(|record| !record.is_expired(now))
            .map(|record| record.remaining(now))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::principal::Tier;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sanctions.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state/sanctions.json"));
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let a = SanctionRecord::new(
            &EnforcementAction::network_block("10.0.0.1".parse().unwrap()),
            at,
            Duration::from_secs(60),
            "burst",
        );
        let b = SanctionRecord::new(&EnforcementAction::account_lock("alice"), at, Duration::from_secs(60), "burst");

        store.save(&[a.clone(), b]).unwrap();
        store.save(&[a.clone()]).unwrap();

        assert_eq!(store.load().unwrap(), vec![a]);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sanctions.json");
        fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::new(path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_view_follows_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sanctions.json"));
        let view = StoredSanctions::new(store.clone());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let later = at + TimeDelta::seconds(100);
        let mallory = Principal::new("tok-m", Tier::Free, "mallory");
        let addr: IpAddr = "10.0.0.9".parse().unwrap();

        assert_eq!(view.remaining(&mallory, Some(addr), later), None);

        let lock = SanctionRecord::new(&EnforcementAction::account_lock("mallory"), at, Duration::from_secs(600), "burst");
        store.save(&[lock]).unwrap();
        assert_eq!(view.remaining(&mallory, None, later), Some(Duration::from_secs(500)));

        let block = SanctionRecord::new(&EnforcementAction::network_block(addr), at, Duration::from_secs(60), "burst");
        store.save(&[block]).unwrap();
        assert_eq!(view.remaining(&mallory, None, later), None);
        assert_eq!(view.remaining(&mallory, Some(addr), at), Some(Duration::from_secs(60)));
        assert_eq!(view.remaining(&mallory, Some(addr), later), None);

        fs::remove_file(store.path()).unwrap();
        assert_eq!(view.remaining(&mallory, Some(addr), at), None);
    }

    #[test]
    fn test_view_keeps_last_snapshot_when_file_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sanctions.json"));
        let view = StoredSanctions::new(store.clone());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mallory = Principal::new("tok-m", Tier::Free, "mallory");

        let lock = SanctionRecord::new(&EnforcementAction::account_lock("mallory"), at, Duration::from_secs(600), "burst");
        store.save(&[lock]).unwrap();
        assert!(view.remaining(&mallory, None, at).is_some());

        fs::write(store.path(), "[{truncated").unwrap();
        assert!(matches!(view.refresh(), Err(StoreError::Corrupt(_))));
        assert_eq!(view.remaining(&mallory, None, at), Some(Duration::from_secs(600)));
    }
}
