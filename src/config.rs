use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::service::CreationProps;
use crate::{zlog_debug, Error, Result};

const DEFAULT_PLAN_URL: &str = "http://localhost:3000/api/agent/plan";
const DEFAULT_EXECUTE_URL: &str = "http://localhost:3000/api/agent/execute";
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Model settings for one agent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentSettings {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub agent_prompting_method: Option<String>,
}

impl AgentSettings {
    pub fn creation_props(&self) -> CreationProps {
        CreationProps {
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentRoles {
    #[serde(default)]
    pub plan: AgentSettings,
    #[serde(default)]
    pub execute: AgentSettings,
    #[serde(default)]
    pub review: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_plan_url")]
    pub plan_url: String,
    #[serde(default = "default_execute_url")]
    pub execute_url: String,
    /// Result persistence endpoint; results are not saved when unset.
    pub result_url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub agents: AgentRoles,
}

fn default_plan_url() -> String {
    DEFAULT_PLAN_URL.to_string()
}

fn default_execute_url() -> String {
    DEFAULT_EXECUTE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plan_url: default_plan_url(),
            execute_url: default_execute_url(),
            result_url: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            agents: AgentRoles::default(),
        }
    }
}

impl Config {
    pub fn waggle_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".waggle"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::waggle_dir()?.join("waggle.toml"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        zlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            zlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        zlog_debug!(
            "Config loaded: plan_url={}, execute_url={}, result_url={:?}, poll_interval_ms={}",
            config.plan_url,
            config.execute_url,
            config.result_url,
            config.poll_interval_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        zlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    fn ensure_dirs() -> Result<()> {
        let waggle_dir = Self::waggle_dir()?;
        if !waggle_dir.exists() {
            zlog_debug!("Creating waggle directory: {}", waggle_dir.display());
            fs::create_dir_all(&waggle_dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.plan_url.trim().is_empty() {
            return Err(Error::Validation("plan_url must not be empty".into()));
        }
        if self.execute_url.trim().is_empty() {
            return Err(Error::Validation("execute_url must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Validation("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}
