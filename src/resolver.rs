//! Turns a project directory into a [`ResolvedConfig`].
//!
//! Full descriptor parsing lives upstream; [`DevcontainerResolver`] reads the
//! strict-JSON subset of `devcontainer.json` this crate needs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::naming::project_hash;
use crate::ports::PortMapping;
use crate::types::{BuildSpec, ResolvedConfig};

pub trait ConfigResolver: Send + Sync {
    fn resolve(&self, project_dir: &Path, account_override: Option<&str>) -> Result<ResolvedConfig>;
}

const DESCRIPTOR_PATHS: [&str; 2] = [".devcontainer/devcontainer.json", ".devcontainer.json"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    image: Option<String>,
    build: Option<BuildSection>,
    remote_user: Option<String>,
    #[serde(default)]
    forward_ports: Vec<Value>,
    #[serde(default)]
    container_env: BTreeMap<String, String>,
    post_create_command: Option<CommandValue>,
    #[serde(default)]
    customizations: Customizations,
}

#[derive(Debug, Default, Deserialize)]
struct BuildSection {
    dockerfile: Option<String>,
    context: Option<String>,
    #[serde(default)]
    args: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandValue {
    Line(String),
    Args(Vec<String>),
}

impl CommandValue {
    fn into_line(self) -> String {
        match self {
            CommandValue::Line(line) => line,
            CommandValue::Args(args) => args.join(" "),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Customizations {
    #[serde(default)]
    reactor: ReactorSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactorSection {
    account: Option<String>,
    default_command: Option<String>,
}

/// Reads `.devcontainer/devcontainer.json` (or `.devcontainer.json`).
#[derive(Debug, Clone)]
pub struct DevcontainerResolver {
    config_root: PathBuf,
    default_account: String,
}

impl DevcontainerResolver {
    pub fn new(config_root: impl Into<PathBuf>, default_account: impl Into<String>) -> Self {
        Self {
            config_root: config_root.into(),
            default_account: default_account.into(),
        }
    }

    fn find_descriptor(project_root: &Path) -> Result<PathBuf> {
        DESCRIPTOR_PATHS
            .iter()
            .map(|p| project_root.join(p))
            .find(|p| p.is_file())
            .ok_or_else(|| Error::InvalidDescriptor {
                path: project_root.to_path_buf(),
                reason: "no devcontainer.json found".into(),
            })
    }
}

impl ConfigResolver for DevcontainerResolver {
    fn resolve(
        &self,
        project_dir: &Path,
        account_override: Option<&str>,
    ) -> Result<ResolvedConfig> {
        let project_root =
            std::fs::canonicalize(project_dir).map_err(|e| Error::io(project_dir, e))?;
        let path = Self::find_descriptor(&project_root)?;
        let raw = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let descriptor: Descriptor =
            serde_json::from_str(&raw).map_err(|e| Error::InvalidDescriptor {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        debug!("Loaded descriptor {}", path.display());

        if descriptor.image.is_none() && descriptor.build.is_none() {
            return Err(Error::InvalidDescriptor {
                path,
                reason: "either \"image\" or \"build\" is required".into(),
            });
        }

        let descriptor_dir = path
            .parent()
            .unwrap_or(project_root.as_path())
            .to_path_buf();
        let build = descriptor.build.map(|b| {
            let context = descriptor_dir.join(b.context.as_deref().unwrap_or("."));
            BuildSpec {
                dockerfile: descriptor_dir.join(b.dockerfile.as_deref().unwrap_or("Dockerfile")),
                context,
                args: b.args,
            }
        });

        let account = account_override
            .map(str::to_string)
            .or(descriptor.customizations.reactor.account)
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.default_account.clone());
        let ports = parse_forward_ports(&descriptor.forward_ports)?;
        let hash = project_hash(&project_root);

        Ok(ResolvedConfig {
            project_config_dir: self.config_root.join(&account).join(&hash),
            account,
            image: descriptor.image,
            build,
            remote_user: descriptor.remote_user.unwrap_or_default(),
            default_command: descriptor.customizations.reactor.default_command,
            ports,
            project_root,
            project_hash: hash,
            container_env: descriptor.container_env,
            post_create_command: descriptor.post_create_command.map(CommandValue::into_line),
        })
    }
}

fn parse_forward_ports(values: &[Value]) -> Result<Vec<PortMapping>> {
    values
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.to_string().parse(),
            Value::String(s) => s.parse(),
            other => Err(Error::InvalidPortMapping {
                input: other.to_string(),
                reason: "expected a number or \"host:container\" string".into(),
            }),
        })
        .collect()
}
