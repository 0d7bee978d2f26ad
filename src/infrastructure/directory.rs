//! Principal directories.

use crate::application::ports::{DirectoryError, PrincipalDirectory};
use crate::domain::principal::{Principal, Tier};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

/// Fixed set of principals, keyed by token.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    principals: HashMap<String, Principal>,
}

impl StaticDirectory {
    pub fn new(principals: impl IntoIterator<Item = Principal>) -> Self {
        Self {
            principals: principals.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

impl PrincipalDirectory for StaticDirectory {
    fn lookup(&self, token: &str) -> Result<Option<Principal>, DirectoryError> {
        Ok(self.principals.get(token).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    username: String,
    token: String,
    permission_level: String,
}

#[derive(Debug, Default)]
struct Snapshot {
    modified: Option<SystemTime>,
    // token -> (username, raw tier)
    users: HashMap<String, (String, String)>,
}

/// Account store kept as a JSON list of users.
///
/// The file is re-read whenever its modification time changes, so accounts
/// registered while the service runs are picked up on their first request.
/// Tiers are parsed at lookup time; an account with an unrecognised tier is
/// reported rather than silently defaulted.
#[derive(Debug)]
pub struct JsonDirectory {
    path: PathBuf,
    cache: RwLock<Snapshot>,
}

impl JsonDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(Snapshot::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh(&self) -> io::Result<()> {
        let modified = match fs::metadata(&self.path) {
            Ok(meta) => Some(meta.modified()?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if cache.modified == modified && modified.is_some() {
                return Ok(());
            }
        }

        let users = match modified {
            None => HashMap::new(),
            Some(_) => {
                let text = fs::read_to_string(&self.path)?;
                let entries: Vec<UserEntry> = serde_json::from_str(&text)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                entries
                    .into_iter()
                    .map(|u| (u.token, (u.username, u.permission_level)))
                    .collect()
            }
        };

        tracing::debug!(path = %self.path.display(), users = users.len(), "account store reloaded");
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Snapshot { modified, users };
        Ok(())
    }
}

impl PrincipalDirectory for JsonDirectory {
    fn lookup(&self, token: &str) -> Result<Option<Principal>, DirectoryError> {
        self.refresh().map_err(DirectoryError::Unavailable)?;

        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let Some((account, raw_tier)) = cache.users.get(token) else {
            return Ok(None);
        };
        let tier: Tier = raw_tier.parse().map_err(|tier| DirectoryError::UnknownTier {
            account: account.clone(),
            tier,
        })?;
        Ok(Some(Principal::new(token, tier, account.as_str())))
    }
}
