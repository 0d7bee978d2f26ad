//! Service configuration file.
//!
//! Every section is optional; omitted values take the defaults below.
//!
//! ```toml
//! [paths]
//! event_log = "data/api.log"
//! users = "data/users.json"
//! sanctions = "data/sanctions.json"
//! journal = "data/enforcement.log"
//!
//! [tiers.free]
//! max_requests = 15
//! window_secs = 60
//! min_interval_secs = 6
//!
//! [detection]
//! window_secs = 60
//! abuse_threshold = 100
//!
//! [enforcement]
//! block_duration_secs = 600
//! lock_accounts = false
//!
//! [sweeper]
//! sweep_interval_secs = 30
//! ```
//!
//! A `[tiers]` table, when present, must define every tier.

use crate::application::aggregator::{AggregatorConfig, AggregatorConfigError};
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::engine::{EngineConfig, EngineConfigError};
use crate::application::sweeper::{SweeperConfig, SweeperConfigError};
use crate::domain::event::Outcome;
use crate::domain::principal::{Tier, UnknownTier};
use crate::domain::quota::{PolicyError, QuotaPolicy, QuotaTable};
use crate::infrastructure::adapters::{CommandAdapter, CommandSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Tier(UnknownTier),
    Policy(PolicyError),
    Detection(AggregatorConfigError),
    Enforcement(EngineConfigError),
    Sweeper(SweeperConfigError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "invalid config: {}", e),
            ConfigError::Tier(e) => write!(f, "invalid [tiers] table: {}", e),
            ConfigError::Policy(e) => write!(f, "invalid quota policy: {}", e),
            ConfigError::Detection(e) => write!(f, "invalid [detection] section: {}", e),
            ConfigError::Enforcement(e) => write!(f, "invalid [enforcement] section: {}", e),
            ConfigError::Sweeper(e) => write!(f, "invalid [sweeper] section: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Tier(e) => Some(e),
            ConfigError::Policy(e) => Some(e),
            ConfigError::Detection(e) => Some(e),
            ConfigError::Enforcement(e) => Some(e),
            ConfigError::Sweeper(e) => Some(e),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<UnknownTier> for ConfigError {
    fn from(e: UnknownTier) -> Self {
        ConfigError::Tier(e)
    }
}

impl From<PolicyError> for ConfigError {
    fn from(e: PolicyError) -> Self {
        ConfigError::Policy(e)
    }
}

impl From<AggregatorConfigError> for ConfigError {
    fn from(e: AggregatorConfigError) -> Self {
        ConfigError::Detection(e)
    }
}

impl From<EngineConfigError> for ConfigError {
    fn from(e: EngineConfigError) -> Self {
        ConfigError::Enforcement(e)
    }
}

impl From<SweeperConfigError> for ConfigError {
    fn from(e: SweeperConfigError) -> Self {
        ConfigError::Sweeper(e)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub paths: PathsSection,
    pub tiers: Option<BTreeMap<String, TierSection>>,
    pub detection: DetectionSection,
    pub enforcement: EnforcementSection,
    pub sweeper: SweeperSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub event_log: PathBuf,
    pub users: PathBuf,
    pub sanctions: PathBuf,
    pub journal: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            event_log: PathBuf::from("data/api.log"),
            users: PathBuf::from("data/users.json"),
            sanctions: PathBuf::from("data/sanctions.json"),
            journal: PathBuf::from("data/enforcement.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierSection {
    pub max_requests: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSection {
    pub window_secs: u64,
    pub abuse_threshold: usize,
    /// Count only these outcomes; all when omitted
    pub counted_outcomes: Option<Vec<Outcome>>,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            window_secs: 60,
            abuse_threshold: 100,
            counted_outcomes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnforcementSection {
    pub block_duration_secs: u64,
    pub adapter_timeout_secs: u64,
    pub max_adapter_retries: u32,
    pub block_addresses: bool,
    pub lock_accounts: bool,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Log actions instead of running commands
    pub dry_run: bool,
    pub network_block: Option<CommandSet>,
    pub account_lock: Option<CommandSet>,
}

impl Default for EnforcementSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            block_duration_secs: engine.block_duration.as_secs(),
            adapter_timeout_secs: engine.adapter_timeout.as_secs(),
            max_adapter_retries: engine.max_adapter_retries,
            block_addresses: engine.block_addresses,
            lock_accounts: engine.lock_accounts,
            breaker_failure_threshold: engine.breaker.failure_threshold,
            breaker_cooldown_secs: engine.breaker.cooldown.as_secs(),
            dry_run: false,
            network_block: None,
            account_lock: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperSection {
    pub sweep_interval_secs: u64,
    pub reversal_interval_secs: Option<u64>,
    /// How long shutdown waits for an in-flight sweep
    pub shutdown_grace_secs: u64,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            reversal_interval_secs: None,
            shutdown_grace_secs: 15,
        }
    }
}

impl GuardConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quota_table()?;
        self.aggregator_config()?;
        self.engine_config()?;
        self.sweeper_config()?;
        Ok(())
    }

    pub fn quota_table(&self) -> Result<QuotaTable, ConfigError> {
        let Some(tiers) = &self.tiers else {
            return Ok(QuotaTable::default());
        };
        let mut policies = Vec::with_capacity(tiers.len());
        for (name, section) in tiers {
            let tier: Tier = name.parse()?;
            let policy = QuotaPolicy::new(
                section.max_requests,
                Duration::from_secs(section.window_secs),
                Duration::from_secs(section.min_interval_secs),
            )?;
            policies.push((tier, policy));
        }
        Ok(QuotaTable::new(policies)?)
    }

    pub fn aggregator_config(&self) -> Result<AggregatorConfig, ConfigError> {
        let d = &self.detection;
        let config = AggregatorConfig::new(Duration::from_secs(d.window_secs), d.abuse_threshold)?;
        Ok(match &d.counted_outcomes {
            Some(outcomes) => config.with_counted_outcomes(outcomes.iter().copied()),
            None => config,
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let e = &self.enforcement;
        let config = EngineConfig {
            block_duration: Duration::from_secs(e.block_duration_secs),
            adapter_timeout: Duration::from_secs(e.adapter_timeout_secs),
            max_adapter_retries: e.max_adapter_retries,
            block_addresses: e.block_addresses,
            lock_accounts: e.lock_accounts,
            breaker: CircuitBreakerConfig {
                failure_threshold: e.breaker_failure_threshold,
                cooldown: Duration::from_secs(e.breaker_cooldown_secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn sweeper_config(&self) -> Result<SweeperConfig, ConfigError> {
        let s = &self.sweeper;
        let config = SweeperConfig::new(Duration::from_secs(s.sweep_interval_secs))?;
        Ok(match s.reversal_interval_secs {
            Some(secs) => config.with_reversal_interval(Duration::from_secs(secs))?,
            None => config,
        })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.sweeper.shutdown_grace_secs)
    }

    /// Command bindings, falling back to the iptables and usermod presets.
    pub fn command_adapter(&self) -> CommandAdapter {
        let e = &self.enforcement;
        CommandAdapter::new(
            Some(e.network_block.clone().unwrap_or_else(CommandSet::iptables)),
            Some(e.account_lock.clone().unwrap_or_else(CommandSet::usermod)),
        )
    }
}
