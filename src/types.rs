//! Data structures shared by the blueprint builder, the lifecycle manager
//! and the workspace orchestrator.
//!
//! `ResolvedConfig` arrives from the descriptor resolver and is read-only
//! here. `ContainerBlueprint` is rebuilt on every invocation. `ContainerRecord`
//! mirrors what the daemon reports and is never cached, since containers can
//! be stopped or removed behind our back between calls.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ports::PortMapping;

/// Label marking every container this crate creates.
pub const LABEL_MANAGED: &str = "reactor.managed";
pub const LABEL_ACCOUNT: &str = "reactor.account";
pub const LABEL_PROJECT: &str = "reactor.project";
/// Workspace instance identity; the source of truth for workspace membership.
pub const LABEL_WORKSPACE: &str = "reactor.workspace";
pub const LABEL_SERVICE: &str = "reactor.service";

/// Image build instructions taken from the environment descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// An environment description after descriptor parsing and flag merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub account: String,
    pub image: Option<String>,
    pub build: Option<BuildSpec>,
    pub remote_user: String,
    pub default_command: Option<String>,
    pub ports: Vec<PortMapping>,
    pub project_root: PathBuf,
    pub project_hash: String,
    pub project_config_dir: PathBuf,
    #[serde(default)]
    pub container_env: BTreeMap<String, String>,
    #[serde(default)]
    pub post_create_command: Option<String>,
}

impl ResolvedConfig {
    /// The image the container runs. A build descriptor wins over `image`
    /// and is tagged deterministically per account and project.
    pub fn run_image(&self) -> String {
        match (&self.build, &self.image) {
            (Some(_), _) => format!(
                "reactor-build-{}-{}:latest",
                crate::naming::sanitize_component(&self.account, "default"),
                self.project_hash
            ),
            (None, Some(image)) => image.clone(),
            (None, None) => String::new(),
        }
    }
}

/// One bind mount. Host paths are kept verbatim and sent to the daemon as
/// structured mount fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: String,
}

impl MountSpec {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A complete, daemon-agnostic description of a container to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerBlueprint {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub user: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Workspace root first, then provider mounts, then the daemon socket.
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortMapping>,
    pub network_mode: String,
    pub labels: BTreeMap<String, String>,
}

/// Lifecycle state as observed on the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
    NotFound,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// A container as the daemon reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

/// Collected result of a command executed inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
