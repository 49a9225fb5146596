use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AutonomyError;

/// Runtime configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Knowledge document with rules, thresholds, and tools.
    pub knowledge_path: PathBuf,
    /// Persisted heuristic store.
    pub heuristics_path: PathBuf,
    /// Seconds between monitor iterations.
    pub heartbeat_secs: u64,
    /// Heartbeat age after which health turns critical.
    pub critical_timeout_secs: u64,
    /// Monitor utilization threshold in percent.
    pub resource_threshold: f64,
    /// Failure probability of physical actions.
    pub failure_probability: f64,
    /// Seed for tool outcomes; entropy when absent.
    pub rng_seed: Option<u64>,
    /// Zone reported when the knowledge file names no region.
    pub zone_fallback: String,
    /// Optional JSON-lines telemetry log.
    pub telemetry_log: Option<PathBuf>,
    /// Optional JSON file holding the status snapshot history.
    pub metrics_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            knowledge_path: PathBuf::from("ai_knowledge.json"),
            heuristics_path: PathBuf::from("dynamic_heuristics.json"),
            heartbeat_secs: 3,
            critical_timeout_secs: 600,
            resource_threshold: 60.0,
            failure_probability: 0.1,
            rng_seed: None,
            zone_fallback: "Kenya_Highlands".into(),
            telemetry_log: None,
            metrics_path: None,
        }
    }
}

impl AgentConfig {
    /// Loads configuration from a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading agent config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `AGRI_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, then re-validates.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("AGRI_KNOWLEDGE_PATH") {
            self.knowledge_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("AGRI_HEURISTICS_PATH") {
            self.heuristics_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("AGRI_METRICS_PATH") {
            self.metrics_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup("AGRI_HEARTBEAT_SECS") {
            self.heartbeat_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("AGRI_HEARTBEAT_SECS={secs}"))?;
        }
        if let Some(threshold) = lookup("AGRI_RESOURCE_THRESHOLD") {
            self.resource_threshold = threshold
                .trim()
                .parse()
                .with_context(|| format!("AGRI_RESOURCE_THRESHOLD={threshold}"))?;
        }
        Ok(self.validate()?)
    }

    /// Rejects values the runtime cannot honor.
    pub fn validate(&self) -> Result<(), AutonomyError> {
        if self.heartbeat_secs == 0 {
            return Err(AutonomyError::Config("heartbeat_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(AutonomyError::Config(format!(
                "failure_probability must be within [0, 1], got {}",
                self.failure_probability
            )));
        }
        if !(0.0..=100.0).contains(&self.resource_threshold) {
            return Err(AutonomyError::Config(format!(
                "resource_threshold must be within [0, 100], got {}",
                self.resource_threshold
            )));
        }
        Ok(())
    }

    /// Monitor heartbeat.
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Health timeout.
    #[must_use]
    pub const fn critical_timeout(&self) -> Duration {
        Duration::from_secs(self.critical_timeout_secs)
    }
}
