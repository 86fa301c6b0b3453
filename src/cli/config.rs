//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit path given on the command line
//! 2. Current directory: ./orchestrator.toml or ./.orchestrator/config.toml
//! 3. User config: ~/.orchestrator/config.toml
//! 4. Built-in defaults
//!
//! ```toml
//! [framework]
//! max_parallel_tasks = 5
//!
//! [execution]
//! work_directory = "./workspace"
//! output_directory = "./output"
//! log_level = "info"
//! stop_on_critical_failure = true
//! cache_ttl_seconds = 600
//!
//! [variables]
//! company = "Acme"
//! ```

use crate::env;
use crate::execution::EngineConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Concurrency cap used when optimizing plans
    pub max_parallel_tasks: usize,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: env::DEFAULT_MAX_PARALLEL_TASKS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionSettings {
    pub work_directory: PathBuf,
    pub output_directory: PathBuf,
    pub log_level: String,
    pub stop_on_critical_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_seconds: Option<u64>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            work_directory: PathBuf::from(env::DEFAULT_WORK_DIR),
            output_directory: PathBuf::from(env::DEFAULT_OUTPUT_DIR),
            log_level: env::DEFAULT_LOG_LEVEL.to_string(),
            stop_on_critical_failure: true,
            cache_ttl_seconds: None,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub framework: FrameworkConfig,
    pub execution: ExecutionSettings,
    /// Project variables exposed to every capability handler
    pub variables: BTreeMap<String, Value>,
}

impl OrchestratorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: OrchestratorConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write configuration file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.framework.max_parallel_tasks == 0 {
            bail!("framework.max_parallel_tasks must be at least 1");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            work_directory: self.execution.work_directory.clone(),
            output_directory: self.execution.output_directory.clone(),
            stop_on_critical_failure: self.execution.stop_on_critical_failure,
            cache_ttl_seconds: self.execution.cache_ttl_seconds,
            variables: self.variables.clone(),
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit file if given, otherwise walk the discovery hierarchy
    pub fn load(explicit: Option<&Path>) -> Result<OrchestratorConfig> {
        if let Some(path) = explicit {
            info!("Loading configuration override from: {}", path.display());
            return OrchestratorConfig::from_toml_file(path);
        }
        Self::discover_config()
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<OrchestratorConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {}", config_path.display());
            return OrchestratorConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(OrchestratorConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {}", candidate.display()))
            .find(|candidate| candidate.is_file())
    }

    /// Configuration file candidates in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::project_config_file_path(&current_dir));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "EXISTS"
            } else if candidate.exists() {
                "NOT A FILE"
            } else {
                "NOT FOUND"
            };
            println!("  {}. {} - {}", i + 1, candidate.display(), status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {}", found.display()),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
