//! Ports (interfaces) for the application layer.
//!
//! The application layer drives these traits; infrastructure adapters
//! implement them. Nothing in `application` touches a file, a process or the
//! system clock directly.

use crate::domain::event::RequestEvent;
use crate::domain::principal::{Principal, UnknownTier};
use crate::domain::sanction::{EnforcementAction, SanctionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::{self, Debug};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Port for obtaining the current wall-clock time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Port for per-key limiter state.
///
/// `upsert` holds the entry for `key` exclusively while `f` runs; other keys
/// stay available to other threads.
pub trait Storage<K, V>: Send + Sync + Debug {
    /// Run `f` on the entry for `key`, inserting `init()` first if absent.
    fn upsert<R>(&self, key: K, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R;

    /// Drop every entry `stale` returns true for. Returns how many went.
    fn evict(&self, stale: impl FnMut(&K, &V) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, T: Storage<K, V>> Storage<K, V> for Arc<T> {
    fn upsert<R>(&self, key: K, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        (**self).upsert(key, init, f)
    }

    fn evict(&self, stale: impl FnMut(&K, &V) -> bool) -> usize {
        (**self).evict(stale)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Read side of the event log.
pub trait EventSource: Send + Sync + Debug {
    /// Return the full log contents as of this call.
    ///
    /// A missing log is an empty log. The returned text is the stable
    /// snapshot one sweep works from; lines appended afterwards belong to the
    /// next sweep.
    fn snapshot(&self) -> io::Result<String>;
}

/// Write side of the event log.
pub trait EventSink: Send + Sync + Debug {
    fn append(&self, event: &RequestEvent) -> io::Result<()>;
}

/// Error raised by a principal directory.
#[derive(Debug)]
pub enum DirectoryError {
    /// The account store assigns a tier with no quota policy
    UnknownTier { account: String, tier: UnknownTier },
    /// The account store could not be read
    Unavailable(io::Error),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::UnknownTier { account, tier } => {
                write!(f, "account '{}' has {}", account, tier)
            }
            DirectoryError::Unavailable(e) => write!(f, "account store unavailable: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DirectoryError::UnknownTier { tier, .. } => Some(tier),
            DirectoryError::Unavailable(e) => Some(e),
        }
    }
}

/// Port to the external account store.
pub trait PrincipalDirectory: Send + Sync + Debug {
    /// Resolve a bearer token. `Ok(None)` means no such principal.
    fn lookup(&self, token: &str) -> Result<Option<Principal>, DirectoryError>;
}

/// Error raised by a sanction store.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Corrupt(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "sanction store i/o error: {}", e),
            StoreError::Corrupt(e) => write!(f, "sanction store is corrupt: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Corrupt(e) => Some(e),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e)
    }
}

/// Durable home of sanction records.
pub trait SanctionStore: Send + Sync + Debug {
    fn load(&self) -> Result<Vec<SanctionRecord>, StoreError>;

    /// Replace the stored set with `records`.
    fn save(&self, records: &[SanctionRecord]) -> Result<(), StoreError>;
}

/// Read side of the applied sanctions, consulted on the request path.
pub trait SanctionLookup: Send + Sync + Debug {
    /// Remaining time of the longest active sanction on the principal's
    /// account or on `address`. Expired records do not count.
    fn remaining(&self, principal: &Principal, address: Option<IpAddr>, now: DateTime<Utc>) -> Option<Duration>;
}

/// Kind of enforcement journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Blocked,
    Unblocked,
}

impl JournalKind {
    pub fn tag(&self) -> &'static str {
        match self {
            JournalKind::Blocked => "[BLOCKED]",
            JournalKind::Unblocked => "[UNBLOCKED]",
        }
    }
}

/// Append-only, human-readable record of enforcement decisions.
pub trait EnforcementJournal: Send + Sync + Debug {
    fn record(&self, at: DateTime<Utc>, kind: JournalKind, message: &str) -> io::Result<()>;
}

/// Error returned by an enforcement adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The call did not finish within the configured bound
    Timeout(Duration),
    /// Calls are suspended after repeated failures
    CircuitOpen,
    /// The subject cannot be passed to the mechanism safely
    InvalidSubject(String),
    /// The underlying mechanism reported a failure
    Failed(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Timeout(d) => write!(f, "adapter call timed out after {:?}", d),
            AdapterError::CircuitOpen => write!(f, "adapter calls suspended (circuit open)"),
            AdapterError::InvalidSubject(s) => write!(f, "refusing to act on subject '{}'", s),
            AdapterError::Failed(msg) => write!(f, "adapter failure: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Capability interface to whatever actually blocks traffic or locks accounts.
///
/// Both operations must be idempotent: `apply` on an already-enforced action
/// and `revert` on an action that is not in force must detect that and
/// return `Ok(())`.
#[async_trait]
pub trait EnforcementAdapter: Send + Sync + Debug {
    async fn apply(&self, action: &EnforcementAction) -> Result<(), AdapterError>;

    async fn revert(&self, action: &EnforcementAction) -> Result<(), AdapterError>;
}
