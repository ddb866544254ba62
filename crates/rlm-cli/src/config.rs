//! Configuration file support for the CLI.
//!
//! All engine data lives under a `.rlm/` directory:
//! - `.rlm/config.toml` - configuration file
//! - `.rlm/runs/<run_id>.json` - one-shot run records
//!
//! Config discovery searches for `.rlm/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The engine data directory name.
pub const RLM_DIR: &str = ".rlm";
/// The config file name within the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure, deserialized from `.rlm/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub model: ModelConfig,
    pub budget: BudgetConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory to resolve relative paths (e.g. context files) from.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { root: PathBuf::from(".") }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name passed through to the LLM adapter for root-level turns.
    pub model_large: String,
    /// Model name used for sub-calls spawned with a "small" size hint.
    pub model_small: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_large: "mock-large".to_string(),
            model_small: "mock-small".to_string(),
        }
    }
}

/// Execution budget, mirroring `rlm_core::Config`'s bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_iterations: u32,
    pub max_depth: u32,
    pub max_concurrent_subcalls: u32,
    pub truncation_head: usize,
    pub truncation_tail: usize,
    pub eval_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub subcall_timeout_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let defaults = rlm_core::Config::default();
        Self {
            max_iterations: defaults.max_iterations,
            max_depth: defaults.max_depth,
            max_concurrent_subcalls: defaults.max_concurrent_subcalls,
            truncation_head: defaults.truncation_head,
            truncation_tail: defaults.truncation_tail,
            eval_timeout_secs: defaults.eval_timeout.as_secs(),
            llm_timeout_secs: defaults.llm_timeout.as_secs(),
            subcall_timeout_secs: defaults.subcall_timeout.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Find and load configuration, searching `.rlm/config.toml` from the
    /// current directory upward through its parents.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        Self::find_and_load_from(&std::env::current_dir()?)
    }

    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();
        loop {
            let rlm_dir = dir.join(RLM_DIR);
            let config_path = rlm_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, rlm_dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Translate into the engine's runtime `Config`.
    pub fn to_engine_config(&self) -> rlm_core::Config {
        rlm_core::Config::default()
            .with_max_iterations(self.budget.max_iterations)
            .with_max_depth(self.budget.max_depth)
            .with_max_concurrent_subcalls(self.budget.max_concurrent_subcalls)
            .with_truncation(self.budget.truncation_head, self.budget.truncation_tail)
            .with_eval_timeout(Duration::from_secs(self.budget.eval_timeout_secs))
            .with_models(self.model.model_large.clone(), self.model.model_small.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.model_large, config.model.model_large);
        assert_eq!(parsed.budget.max_depth, config.budget.max_depth);
    }

    #[test]
    fn parse_minimal_config_falls_back_to_defaults() {
        let toml_str = r#"
[model]
model_large = "claude-test"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.model_large, "claude-test");
        assert_eq!(config.model.model_small, ModelConfig::default().model_small);
        assert_eq!(config.budget.max_depth, BudgetConfig::default().max_depth);
    }

    #[test]
    fn to_engine_config_carries_budget_fields() {
        let mut config = Config::default();
        config.budget.max_depth = 3;
        config.budget.max_iterations = 7;
        let engine_config = config.to_engine_config();
        assert_eq!(engine_config.max_depth, 3);
        assert_eq!(engine_config.max_iterations, 7);
    }
}
