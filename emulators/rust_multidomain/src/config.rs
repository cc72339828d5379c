use crate::domain::DomainMask;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine tunables. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Prefix for every log line of this engine.
    pub name: String,
    /// Total symbolic register node count above which symbolic is disabled.
    pub complexity_threshold: usize,
    /// Triggered instructions between solver statistics reports; 0 disables.
    pub report_interval: u64,
    /// Domains activated by the trigger.
    pub allowed_domains: DomainMask,
    /// Ask the solver to rule out aliasing cells on memory reads.
    pub read_pruning: bool,
    /// Log every solver query and answer at debug level.
    pub solver_debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "multidomain".to_string(),
            complexity_threshold: 10_000,
            report_interval: 100,
            allowed_domains: DomainMask::ALL,
            read_pruning: true,
            solver_debug: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
