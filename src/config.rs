use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::naming::NamingContext;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
    pub daemon_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    /// Deadline for the post-create hook, which may install dependencies.
    pub hook_timeout_secs: u64,
    /// Deadline for workspace `exec`; falls back to `daemon_timeout_secs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_timeout_secs: Option<u64>,
    /// Prepended to every container name; lets tests share a live daemon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_root: Option<PathBuf>,
    pub default_account: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_socket: None,
            daemon_timeout_secs: 30,
            stop_timeout_secs: 10,
            hook_timeout_secs: 600,
            exec_timeout_secs: None,
            isolation_prefix: None,
            config_root: None,
            default_account: "default".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("reactor.toml"))
                .merge(Json::file("reactor.json"))
                .merge(Env::prefixed("REACTOR_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        if config.daemon_timeout_secs == 0 {
            anyhow::bail!("daemon_timeout_secs must be greater than zero");
        }
        if config.hook_timeout_secs == 0 || config.exec_timeout_secs == Some(0) {
            anyhow::bail!("hook and exec timeouts must be greater than zero");
        }
        Ok(config)
    }

    pub fn daemon_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs.unwrap_or(self.daemon_timeout_secs))
    }

    pub fn naming(&self) -> NamingContext {
        NamingContext::new(self.isolation_prefix.clone())
    }

    /// Root of the `account/project-hash/provider` credential tree.
    pub fn config_root(&self) -> PathBuf {
        match &self.config_root {
            Some(root) => root.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".reactor"),
        }
    }
}
