//! Node configuration types.
//!
//! Configuration is resolved in three layers: built-in defaults, then an
//! optional YAML file, then command-line overrides applied by the binary.

use crate::observability::LogFormat;
use authchain_ledger::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Consensus timing, in config-file units.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// Seconds a block may wait for quorum before it expires.
    pub timeout_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Expired blocks kept in the stale log.
    pub max_stale_records: usize,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        let defaults = ConsensusConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            max_stale_records: defaults.max_stale_records,
        }
    }
}

impl ConsensusSettings {
    /// Converts to the ledger's consensus configuration.
    pub fn to_consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_stale_records: self.max_stale_records,
        }
    }
}

/// File mailbox settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Whether the mailbox watcher runs.
    pub enabled: bool,
    /// Directory polled for `payload_*.json` files.
    pub dir: PathBuf,
    /// Milliseconds between polls.
    pub poll_interval_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./mailbox/blockchain"),
            poll_interval_ms: 500,
        }
    }
}

impl MailboxConfig {
    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A validator registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeedValidator {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Configuration for the AuthChain node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP API listen address.
    pub api_addr: SocketAddr,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Ledger snapshot file name, relative to `data_dir`.
    pub ledger_file: String,
    /// Log level.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Origins allowed by CORS. `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// Consensus timing.
    pub consensus: ConsensusSettings,
    /// File mailbox.
    pub mailbox: MailboxConfig,
    /// Validators registered at startup.
    pub validators: Vec<SeedValidator>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            data_dir: PathBuf::from("./data"),
            ledger_file: "blockchain.json".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://localhost:8080".to_string(),
            ],
            consensus: ConsensusSettings::default(),
            mailbox: MailboxConfig::default(),
            validators: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a YAML document. Missing keys take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Full path of the ledger snapshot.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    /// Checks the configuration for values the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_file.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger_file cannot be empty".into()));
        }
        if self.consensus.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "consensus.timeout_secs must be positive".into(),
            ));
        }
        if self.consensus.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "consensus.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.consensus.max_stale_records == 0 {
            return Err(ConfigError::Invalid(
                "consensus.max_stale_records must be positive".into(),
            ));
        }
        if self.mailbox.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "mailbox.poll_interval_ms must be positive".into(),
            ));
        }
        if self.consensus.timeout_secs < self.consensus.sweep_interval_secs {
            tracing::warn!(
                timeout_secs = self.consensus.timeout_secs,
                sweep_interval_secs = self.consensus.sweep_interval_secs,
                "consensus timeout is shorter than the sweep interval"
            );
        }

        let mut seen = HashSet::new();
        for validator in &self.validators {
            let id = validator.id.trim();
            if id.is_empty() {
                return Err(ConfigError::Invalid("validator id cannot be empty".into()));
            }
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate validator id: {}",
                    id
                )));
            }
        }

        Ok(())
    }
}
