use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dispatch::protocol::DEFAULT_FROM_AGENT;
use crate::{clog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub task_dag_path: Option<String>,
    pub task_package_path: Option<String>,
    pub journal_path: Option<String>,
    pub report_path: Option<String>,
    pub from_agent: Option<String>,
    #[serde(default = "default_fail_on_invalid_dependencies")]
    pub fail_on_invalid_dependencies: bool,
}

fn default_fail_on_invalid_dependencies() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_dag_path: None,
            task_package_path: None,
            journal_path: None,
            report_path: None,
            from_agent: None,
            fail_on_invalid_dependencies: default_fail_on_invalid_dependencies(),
        }
    }
}

impl Config {
    /// `~/.cognition`, home of the config, log and default artifacts.
    pub fn cognition_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".cognition"))
    }

    /// `~/.cognition/dispatch.toml`.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::cognition_dir()?.join("dispatch.toml"))
    }

    /// Load from `~/.cognition/dispatch.toml`, or defaults if it is absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        clog_debug!(
            "Config loaded: task_dag={:?}, package={:?}, journal={:?}, report={:?}",
            config.task_dag_path,
            config.task_package_path,
            config.journal_path,
            config.report_path
        );
        Ok(config)
    }

    /// Configured sender, or the default core agent when unset or blank.
    pub fn effective_from_agent(&self) -> &str {
        self.from_agent
            .as_deref()
            .map(str::trim)
            .filter(|agent| !agent.is_empty())
            .unwrap_or(DEFAULT_FROM_AGENT)
    }

    /// Compiled DAG artifact (`task-dag.json`).
    pub fn task_dag_path(&self) -> Result<PathBuf> {
        resolve(self.task_dag_path.as_deref(), "task-dag.json")
    }

    /// Packaged requests and blocked items (`task-package.json`).
    pub fn task_package_path(&self) -> Result<PathBuf> {
        resolve(self.task_package_path.as_deref(), "task-package.json")
    }

    /// Append-only task journal (`tasks.journal.jsonl`).
    pub fn journal_path(&self) -> Result<PathBuf> {
        resolve(self.journal_path.as_deref(), "tasks.journal.jsonl")
    }

    /// Dispatch report (`dispatch.report.json`).
    pub fn report_path(&self) -> Result<PathBuf> {
        resolve(self.report_path.as_deref(), "dispatch.report.json")
    }
}

/// Configured path with `~/` expanded, else `file_name` under the cognition dir.
fn resolve(configured: Option<&str>, file_name: &str) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(expand_tilde(path)),
        None => Ok(Config::cognition_dir()?.join(file_name)),
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
