use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engines::command::CommandEngineSpec;
use crate::identity::ParamSet;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "VIDEVAL_DATA_DIR";

/// Configuration surface consumed by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Stream workfiles through named pipes instead of materializing
    /// them on disk.
    pub fifo_mode: bool,
    /// Tear down workfiles and the log artifact once a result has been
    /// extracted.
    pub delete_workdir: bool,
    /// Fan assets out across a worker pool instead of mapping in order.
    pub parallelize: bool,
    /// Worker pool size; system default when absent.
    pub workers: Option<usize>,
    /// Parameters that impact results. These enter the computation
    /// identity and therefore the cache namespace.
    pub params: Option<ParamSet>,
    /// Parameters that must never impact results (cache file locations
    /// and the like); kept out of the identity by construction.
    pub extra: Option<ParamSet>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            fifo_mode: true,
            delete_workdir: true,
            parallelize: false,
            workers: None,
            params: None,
            extra: None,
        }
    }
}

/// Top-level config file: the runner surface plus an optional external
/// metric engine declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub runner: RunnerConfig,
    pub engine: Option<CommandEngineSpec>,
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. VIDEVAL_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}
