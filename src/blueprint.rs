//! Translates a resolved configuration into a container blueprint.
//!
//! Pure and total: no I/O and no daemon access. A malformed config (say an
//! empty project root) yields a blueprint that fails at the daemon, not here.

use std::collections::BTreeMap;

use crate::providers::ProviderRegistry;
use crate::types::{ContainerBlueprint, MountSpec, ResolvedConfig};

pub const WORKSPACE_PATH: &str = "/app";
pub const FALLBACK_USER: &str = "claude";
pub const SHELL: &str = "/bin/bash";
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub const DOCKER_HOST_ENV: &str = "REACTOR_DOCKER_HOST_INTEGRATION";
pub const NETWORK_MODE: &str = "bridge";

/// Mode flags that change how a blueprint is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlueprintMode {
    /// No workspace or credential mounts; only the optional daemon socket.
    pub discovery: bool,
    pub docker_host_integration: bool,
}

pub fn build_blueprint(
    resolved: &ResolvedConfig,
    mode: BlueprintMode,
    providers: &ProviderRegistry,
    name: impl Into<String>,
) -> ContainerBlueprint {
    ContainerBlueprint {
        name: name.into(),
        image: resolved.run_image(),
        command: command_for(resolved.default_command.as_deref()),
        working_dir: WORKSPACE_PATH.to_string(),
        user: user_for(&resolved.remote_user),
        env: env_for(resolved, mode),
        mounts: mounts_for(resolved, mode, providers),
        ports: resolved.ports.clone(),
        network_mode: NETWORK_MODE.to_string(),
        labels: BTreeMap::new(),
    }
}

fn command_for(default_command: Option<&str>) -> Vec<String> {
    match default_command.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cmd) => vec![SHELL.to_string(), "-c".to_string(), cmd.to_string()],
        None => vec![SHELL.to_string()],
    }
}

fn user_for(remote_user: &str) -> String {
    let user = remote_user.trim();
    if user.is_empty() {
        FALLBACK_USER.to_string()
    } else {
        user.to_string()
    }
}

fn env_for(resolved: &ResolvedConfig, mode: BlueprintMode) -> Vec<String> {
    let mut env = vec![
        format!("REACTOR_ACCOUNT={}", resolved.account),
        format!("REACTOR_PROJECT_HASH={}", resolved.project_hash),
    ];
    if mode.discovery {
        env.push("REACTOR_DISCOVERY=true".to_string());
    }
    env.extend(
        resolved
            .container_env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v)),
    );
    if mode.docker_host_integration {
        env.push(format!("{}=true", DOCKER_HOST_ENV));
    }
    env
}

fn mounts_for(
    resolved: &ResolvedConfig,
    mode: BlueprintMode,
    providers: &ProviderRegistry,
) -> Vec<MountSpec> {
    let mut mounts = Vec::new();
    if !mode.discovery {
        mounts.push(MountSpec::new(&resolved.project_root, WORKSPACE_PATH));
        for provider in providers.iter() {
            for point in &provider.mount_points {
                mounts.push(MountSpec::new(
                    resolved.project_config_dir.join(&point.source),
                    point.target.clone(),
                ));
            }
        }
    }
    if mode.docker_host_integration {
        mounts.push(MountSpec::new(DOCKER_SOCKET, DOCKER_SOCKET));
    }
    mounts
}
