//! Principals and service tiers.
//!
//! A principal is an authenticated caller identified by its opaque API token.
//! Its tier selects the quota policy the rate limiter applies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Plus,
    Pro,
}

impl Tier {
    /// Every tier, in ascending order of service level.
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Plus, Tier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Plus => "plus",
            Tier::Pro => "pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tier name is not one of `free`, `plus` or `pro`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTier(pub String);

impl fmt::Display for UnknownTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tier '{}'", self.0)
    }
}

impl std::error::Error for UnknownTier {}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "plus" => Ok(Tier::Plus),
            "pro" => Ok(Tier::Pro),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// An authenticated caller subject to quota and sanction.
///
/// `id` is the bearer token presented on each request and is what the event
/// log records. `account` is the backing account name, the target of an
/// account lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: String,
    pub tier: Tier,
    pub account: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, tier: Tier, account: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier,
            account: account.into(),
        }
    }
}
