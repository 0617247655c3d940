//! Runs many service lifecycles as one workspace.
//!
//! `up` validates everything (paths, descriptors, port claims) before any
//! container is touched, then starts every service on its own task and waits
//! for all of them. A failing service never cancels its siblings; each
//! outcome lands in the report. Workspace membership is tracked by labels,
//! not by container names.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::lifecycle::UpOutcome;
use crate::naming::workspace_name_prefix;
use crate::ports::{self, detect_cross_service_conflicts};
use crate::runtime::with_deadline;
use crate::service::{ServiceRunner, ServiceUpRequest};
use crate::types::{
    ContainerRecord, ContainerState, ExecOutput, ResolvedConfig, LABEL_SERVICE, LABEL_WORKSPACE,
};
use crate::workspace::Workspace;

/// Flags applied to every service of a workspace `up`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceUpOptions {
    pub force_rebuild: bool,
    pub discovery: bool,
    pub docker_host_integration: bool,
    /// Extra tags; the workspace and service labels always win.
    pub labels: BTreeMap<String, String>,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct ServiceResult {
    pub service: String,
    pub result: Result<UpOutcome>,
}

#[derive(Debug)]
pub struct WorkspaceReport {
    pub workspace_id: String,
    pub services: Vec<ServiceResult>,
}

impl WorkspaceReport {
    pub fn has_failures(&self) -> bool {
        self.services.iter().any(|s| s.result.is_err())
    }

    pub fn get(&self, service: &str) -> Option<&ServiceResult> {
        self.services.iter().find(|s| s.service == service)
    }
}

impl fmt::Display for WorkspaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16} {:<10} {:<40} DETAIL", "SERVICE", "STATUS", "CONTAINER")?;
        for s in &self.services {
            match &s.result {
                Ok(up) => writeln!(
                    f,
                    "{:<16} {:<10} {:<40} {}",
                    s.service,
                    up.action,
                    up.container_name,
                    short_id(&up.container_id)
                )?,
                Err(e) => writeln!(f, "{:<16} {:<10} {:<40} {}", s.service, "failed", "-", e)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TeardownResult {
    pub service: String,
    pub container_name: String,
    /// `Ok(false)` when the container was already gone.
    pub result: Result<bool>,
}

#[derive(Debug)]
pub struct TeardownReport {
    pub workspace_id: String,
    pub containers: Vec<TeardownResult>,
}

impl TeardownReport {
    pub fn has_failures(&self) -> bool {
        self.containers.iter().any(|c| c.result.is_err())
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.containers.is_empty() {
            return writeln!(f, "No containers for workspace {}", self.workspace_id);
        }
        writeln!(f, "{:<16} {:<40} STATUS", "SERVICE", "CONTAINER")?;
        for c in &self.containers {
            let status = match &c.result {
                Ok(true) => "removed".to_string(),
                Ok(false) => "already gone".to_string(),
                Err(e) => format!("failed: {}", e),
            };
            writeln!(f, "{:<16} {:<40} {}", c.service, c.container_name, status)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service: String,
    pub container_name: String,
    pub container_id: String,
    pub state: ContainerState,
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

struct ServicePlan {
    service: String,
    request: ServiceUpRequest,
    resolved: ResolvedConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    runner: ServiceRunner,
    exec_timeout: Duration,
}

impl Orchestrator {
    pub fn new(runner: ServiceRunner) -> Self {
        let exec_timeout = runner.lifecycle().timeout();
        Self {
            runner,
            exec_timeout,
        }
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn runner(&self) -> &ServiceRunner {
        &self.runner
    }

    pub async fn up(
        &self,
        workspace: &Workspace,
        selected: &[String],
        options: &WorkspaceUpOptions,
    ) -> Result<WorkspaceReport> {
        let workspace_id = workspace.instance_id();
        let plans = self.plan(workspace, selected, options, &workspace_id)?;
        info!(
            "Starting {} service(s) for workspace {}",
            plans.len(),
            workspace_id
        );

        let handles: Vec<(String, JoinHandle<Result<UpOutcome>>)> = plans
            .into_iter()
            .map(|plan| {
                let runner = self.runner.clone();
                let service = plan.service.clone();
                let handle = tokio::spawn(async move {
                    runner.up_resolved(&plan.request, plan.resolved).await
                });
                (service, handle)
            })
            .collect();

        let mut services = Vec::with_capacity(handles.len());
        for (service, handle) in handles {
            let result = join_result(&service, "up", handle.await);
            match &result {
                Ok(up) => info!("Service {} {} as {}", service, up.action, up.container_name),
                Err(e) => error!("{}", e),
            }
            services.push(ServiceResult { service, result });
        }
        Ok(WorkspaceReport {
            workspace_id,
            services,
        })
    }

    /// Pre-flight: every check that can fail without the daemon.
    fn plan(
        &self,
        workspace: &Workspace,
        selected: &[String],
        options: &WorkspaceUpOptions,
        workspace_id: &str,
    ) -> Result<Vec<ServicePlan>> {
        let services = workspace.select(selected)?;

        let mut dirs = Vec::with_capacity(services.len());
        for service in &services {
            let dir = workspace.service_dir(service)?;
            dirs.push((service.clone(), dir));
        }

        let mut plans = Vec::with_capacity(dirs.len());
        let mut claims = BTreeMap::new();
        for (service, dir) in dirs {
            let mut labels = options.labels.clone();
            labels.insert(LABEL_WORKSPACE.to_string(), workspace_id.to_string());
            labels.insert(LABEL_SERVICE.to_string(), service.clone());
            let request = ServiceUpRequest {
                project_dir: dir,
                account: workspace.entry(&service)?.account.clone(),
                name_prefix: Some(workspace_name_prefix(&service)),
                port_overrides: Vec::new(),
                force_rebuild: options.force_rebuild,
                discovery: options.discovery,
                docker_host_integration: options.docker_host_integration,
                labels,
                verbose: options.verbose,
            };
            let resolved = self
                .runner
                .resolve(&request)
                .map_err(|e| e.for_service(&service))?;
            ports::validate_no_conflicts(&resolved.ports).map_err(|e| e.for_service(&service))?;
            claims.insert(service.clone(), resolved.ports.clone());
            plans.push(ServicePlan {
                service,
                request,
                resolved,
            });
        }

        let conflicts = detect_cross_service_conflicts(&claims);
        if !conflicts.is_empty() {
            return Err(Error::CrossServicePortConflicts(conflicts));
        }
        Ok(plans)
    }

    async fn find(
        &self,
        workspace_id: &str,
        service: Option<&str>,
    ) -> Result<Vec<ContainerRecord>> {
        let mut labels = vec![(LABEL_WORKSPACE.to_string(), workspace_id.to_string())];
        if let Some(service) = service {
            labels.push((LABEL_SERVICE.to_string(), service.to_string()));
        }
        let lifecycle = self.runner.lifecycle();
        with_deadline(
            lifecycle.timeout(),
            "list",
            workspace_id,
            lifecycle.runtime().list(&labels),
        )
        .await
    }

    async fn find_selected(
        &self,
        workspace: &Workspace,
        selected: &[String],
    ) -> Result<Vec<ContainerRecord>> {
        let workspace_id = workspace.instance_id();
        if selected.is_empty() {
            return self.find(&workspace_id, None).await;
        }
        let mut records = Vec::new();
        for service in workspace.select(selected)? {
            records.extend(self.find(&workspace_id, Some(&service)).await?);
        }
        Ok(records)
    }

    /// Every container labelled with this workspace.
    pub async fn list(&self, workspace: &Workspace) -> Result<Vec<ServiceStatus>> {
        let mut statuses: Vec<ServiceStatus> = self
            .find(&workspace.instance_id(), None)
            .await?
            .into_iter()
            .map(|r| ServiceStatus {
                service: service_label(&r),
                container_name: r.name,
                container_id: r.id,
                state: r.state,
            })
            .collect();
        statuses.sort_by(|a, b| {
            (a.service.as_str(), a.container_name.as_str())
                .cmp(&(b.service.as_str(), b.container_name.as_str()))
        });
        Ok(statuses)
    }

    /// Tears down the workspace's containers concurrently. Containers that
    /// vanish mid-way count as success.
    pub async fn down(&self, workspace: &Workspace, selected: &[String]) -> Result<TeardownReport> {
        let workspace_id = workspace.instance_id();
        let records = self.find_selected(workspace, selected).await?;
        info!(
            "Tearing down {} container(s) for workspace {}",
            records.len(),
            workspace_id
        );

        let handles: Vec<(String, String, JoinHandle<Result<bool>>)> = records
            .into_iter()
            .map(|record| {
                let lifecycle = self.runner.lifecycle().clone();
                let service = service_label(&record);
                let name = record.name.clone();
                let handle = tokio::spawn(async move { lifecycle.teardown(&record).await });
                (service, name, handle)
            })
            .collect();

        let mut containers = Vec::with_capacity(handles.len());
        for (service, container_name, handle) in handles {
            let result = join_result(&service, "down", handle.await);
            if let Err(e) = &result {
                warn!("Teardown of {} failed: {}", container_name, e);
            }
            containers.push(TeardownResult {
                service,
                container_name,
                result,
            });
        }
        Ok(TeardownReport {
            workspace_id,
            containers,
        })
    }

    /// Runs `command` in the single running container of `service`.
    pub async fn exec(
        &self,
        workspace: &Workspace,
        service: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        workspace.entry(service)?;
        let running: Vec<ContainerRecord> = self
            .find(&workspace.instance_id(), Some(service))
            .await?
            .into_iter()
            .filter(|r| r.state == ContainerState::Running)
            .collect();
        let container = match running.as_slice() {
            [] => return Err(Error::ServiceNotRunning(service.to_string())),
            [one] => one,
            many => {
                return Err(Error::AmbiguousService {
                    service: service.to_string(),
                    count: many.len(),
                })
            }
        };

        let runtime = self.runner.lifecycle().runtime();
        with_deadline(
            self.exec_timeout,
            "exec",
            &container.name,
            runtime.exec(&container.id, command, None),
        )
        .await
        .map_err(|e| e.for_service(service))
    }
}

fn service_label(record: &ContainerRecord) -> String {
    record
        .labels
        .get(LABEL_SERVICE)
        .cloned()
        .unwrap_or_else(|| "-".to_string())
}

fn join_result<T>(
    service: &str,
    operation: &'static str,
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match joined {
        Ok(result) => result.map_err(|e| e.for_service(service)),
        Err(e) => Err(Error::Daemon {
            operation,
            target: service.to_string(),
            message: format!("task aborted: {}", e),
        }
        .for_service(service)),
    }
}
