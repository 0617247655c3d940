use super::ContainerRuntime;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ContainerBlueprint, ContainerRecord, ContainerState, ExecOutput};
use async_trait::async_trait;
use bollard::container::{
    Config as CreateConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, HostConfig, Mount, MountBindOptions, MountTypeEnum, PortBinding,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::{StreamExt, TryStreamExt};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// [`ContainerRuntime`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    timeout: Duration,
}

impl DockerRuntime {
    pub fn new(docker: Docker, timeout: Duration) -> Self {
        Self { docker, timeout }
    }

    /// Connects using the configured socket, or the platform defaults
    /// (unix socket on Linux, `DOCKER_HOST` when set).
    pub fn connect(cfg: &Config) -> Result<Self> {
        let timeout = cfg.daemon_timeout();
        let docker = match &cfg.docker_socket {
            Some(socket) => {
                Docker::connect_with_socket(socket, timeout.as_secs(), API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults().map(|d| d.with_timeout(timeout)),
        }
        .map_err(|e| Error::DaemonConnect(e.to_string()))?;
        Ok(Self::new(docker, timeout))
    }

    fn op_error(&self, operation: &'static str, target: &str, err: BollardError) -> Error {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404, ..
            } => Error::NotFound(target.to_string()),
            BollardError::RequestTimeoutError => Error::DaemonTimeout {
                operation,
                target: target.to_string(),
                timeout: self.timeout,
            },
            other => Error::Daemon {
                operation,
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerRecord>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => Ok(Some(record_from_inspect(detail, name))),
            Err(e) => match self.op_error("inspect", name, e) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match self.op_error("inspect_image", image, e) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image_ref(image);
        info!("Pulling image {}", image);
        let opts = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(opts), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| self.op_error("pull_image", image, e))?;
        Ok(())
    }

    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String> {
        let opts = CreateContainerOptions {
            name: blueprint.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(opts), create_config(blueprint))
            .await
            .map_err(|e| self.op_error("create", &blueprint.name, e))?;
        for warning in response.warnings {
            debug!("Daemon warning for {}: {}", blueprint.name, warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let paused = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|d| d.state)
            .and_then(|s| s.paused)
            .unwrap_or(false);
        if paused {
            info!("Unpausing container {}", id);
            return self
                .docker
                .unpause_container(id)
                .await
                .map_err(|e| self.op_error("unpause", id, e));
        }
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| self.op_error("start", id, e))
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let opts = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(opts)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(self.op_error("stop", id, e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(opts))
            .await
            .map_err(|e| self.op_error("remove", id, e))
    }

    async fn list(&self, labels: &[(String, String)]) -> Result<Vec<ContainerRecord>> {
        let label_filters = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), label_filters);
        let opts = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| self.op_error("list", "containers", e))?;

        let mut records = Vec::with_capacity(containers.len());
        for c in containers {
            let id = match c.id {
                Some(id) => id,
                None => continue,
            };
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            let state = match c.state.as_deref() {
                Some("running") => ContainerState::Running,
                _ => ContainerState::Stopped,
            };
            records.push(ContainerRecord {
                id,
                name,
                state,
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default().into_iter().collect(),
            });
        }
        Ok(records)
    }

    async fn exec(&self, id: &str, command: &[String], user: Option<&str>) -> Result<ExecOutput> {
        info!("Executing {:?} in {}", command, id);
        let opts = CreateExecOptions::<String> {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            user: user.map(str::to_string),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, opts)
            .await
            .map_err(|e| self.op_error("exec", id, e))?;

        let mut output = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| self.op_error("exec", id, e))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| self.op_error("exec", id, e))?;
                    output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| self.op_error("exec", id, e))?;
        Ok(ExecOutput {
            exit_code: inspected.exit_code.unwrap_or_default(),
            output,
        })
    }
}

fn create_config(bp: &ContainerBlueprint) -> CreateConfig<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for p in &bp.ports {
        let key = format!("{}/tcp", p.container);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings
            .entry(key)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: None,
                host_port: Some(p.host.to_string()),
            });
    }

    // Typed mounts: host paths reach the daemon verbatim, with no `src:dst`
    // string to split on `:` or `,`.
    let mounts = bp
        .mounts
        .iter()
        .map(|m| Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(m.source.to_string_lossy().into_owned()),
            target: Some(m.target.clone()),
            bind_options: Some(MountBindOptions {
                create_mountpoint: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    CreateConfig {
        image: Some(bp.image.clone()),
        cmd: Some(bp.command.clone()),
        working_dir: Some(bp.working_dir.clone()),
        user: Some(bp.user.clone()),
        env: Some(bp.env.clone()),
        labels: Some(bp.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        tty: Some(true),
        open_stdin: Some(true),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            network_mode: Some(bp.network_mode.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A paused container counts as stopped; `start` unpauses it.
fn record_from_inspect(detail: ContainerInspectResponse, requested: &str) -> ContainerRecord {
    let running = detail
        .state
        .as_ref()
        .map(|s| s.running.unwrap_or(false) && !s.paused.unwrap_or(false))
        .unwrap_or(false);
    let (image, labels) = match detail.config {
        Some(cfg) => (
            cfg.image.unwrap_or_default(),
            cfg.labels
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
        ),
        None => (String::new(), BTreeMap::new()),
    };
    ContainerRecord {
        id: detail.id.unwrap_or_else(|| requested.to_string()),
        name: detail
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| requested.to_string()),
        state: if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        },
        image,
        labels,
    }
}

/// Splits `repo[:tag]`, leaving registry ports and digests intact.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_segment = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment..].rfind(':') {
        Some(i) => (&image[..last_segment + i], &image[last_segment + i + 1..]),
        None => (image, "latest"),
    }
}
