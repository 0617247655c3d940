//! Container recovery protocol.
//!
//! `up` looks the blueprint's name up on the daemon and then reuses a
//! running container, restarts a stopped one, or creates and starts a new
//! one. Every daemon call is bounded by the manager's timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::error::Result;
use crate::runtime::{with_deadline, ContainerRuntime};
use crate::types::{ContainerBlueprint, ContainerRecord, ContainerState};

/// What to do with a stopped container found under the blueprint's name.
///
/// `Restart` starts the stored container unchanged, so blueprint changes
/// made since it was created are not applied. `Recreate` removes it and
/// creates a fresh container from the current blueprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoppedPolicy {
    #[default]
    Restart,
    Recreate,
}

/// Which branch of the recovery protocol `up` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpAction {
    Reused,
    Restarted,
    Created,
}

impl fmt::Display for UpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => write!(f, "reused"),
            Self::Restarted => write!(f, "restarted"),
            Self::Created => write!(f, "created"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpOutcome {
    pub container_id: String,
    pub container_name: String,
    pub action: UpAction,
}

pub struct LifecycleManager<R: ?Sized> {
    runtime: Arc<R>,
    timeout: Duration,
    stop_grace: Duration,
    stopped_policy: StoppedPolicy,
}

impl<R: ?Sized> Clone for LifecycleManager<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            timeout: self.timeout,
            stop_grace: self.stop_grace,
            stopped_policy: self.stopped_policy,
        }
    }
}

impl<R: ContainerRuntime + ?Sized> LifecycleManager<R> {
    pub fn new(runtime: Arc<R>, timeout: Duration) -> Self {
        Self {
            runtime,
            timeout,
            stop_grace: Duration::from_secs(10),
            stopped_policy: StoppedPolicy::default(),
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_stopped_policy(mut self, policy: StoppedPolicy) -> Self {
        self.stopped_policy = policy;
        self
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stopped_policy(&self) -> StoppedPolicy {
        self.stopped_policy
    }

    /// Current daemon view of `name`. Never cached.
    pub async fn discover(&self, name: &str) -> Result<Option<ContainerRecord>> {
        with_deadline(self.timeout, "inspect", name, self.runtime.inspect(name)).await
    }

    pub async fn up(&self, blueprint: &ContainerBlueprint) -> Result<UpOutcome> {
        let name = blueprint.name.as_str();
        let existing = self.discover(name).await?;
        let state = existing
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(ContainerState::NotFound);
        debug!("Container {} is {}", name, state);

        match (state, existing) {
            (ContainerState::Running, Some(record)) => {
                info!("Reusing running container {}", name);
                Ok(self.outcome(record.id, name, UpAction::Reused))
            }
            (ContainerState::Stopped, Some(record)) => match self.stopped_policy {
                StoppedPolicy::Restart => {
                    info!("Restarting stopped container {}", name);
                    with_deadline(self.timeout, "start", name, self.runtime.start(&record.id))
                        .await?;
                    Ok(self.outcome(record.id, name, UpAction::Restarted))
                }
                StoppedPolicy::Recreate => {
                    info!("Recreating stopped container {}", name);
                    self.remove_tolerant(&record.id, name).await?;
                    self.create_and_start(blueprint).await
                }
            },
            _ => self.create_and_start(blueprint).await,
        }
    }

    async fn create_and_start(&self, blueprint: &ContainerBlueprint) -> Result<UpOutcome> {
        let name = blueprint.name.as_str();
        info!("Creating container {} from {}", name, blueprint.image);
        let id = with_deadline(self.timeout, "create", name, self.runtime.create(blueprint)).await?;
        with_deadline(self.timeout, "start", name, self.runtime.start(&id)).await?;
        Ok(self.outcome(id, name, UpAction::Created))
    }

    fn outcome(&self, id: String, name: &str, action: UpAction) -> UpOutcome {
        UpOutcome {
            container_id: id,
            container_name: name.to_string(),
            action,
        }
    }

    /// Stops and removes `name`. Missing or already-stopped containers are
    /// treated as success. Returns whether a container was removed.
    pub async fn down(&self, name: &str) -> Result<bool> {
        let record = match self.discover(name).await? {
            Some(record) => record,
            None => {
                debug!("Container {} already removed", name);
                return Ok(false);
            }
        };
        self.teardown(&record).await
    }

    /// Teardown for a record already obtained from `discover` or a label query.
    pub async fn teardown(&self, record: &ContainerRecord) -> Result<bool> {
        if record.state == ContainerState::Running {
            info!("Stopping container {}", record.name);
            let stopped = with_deadline(
                self.timeout + self.stop_grace,
                "stop",
                &record.name,
                self.runtime.stop(&record.id, self.stop_grace),
            )
            .await;
            match stopped {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        self.remove_tolerant(&record.id, &record.name).await
    }

    async fn remove_tolerant(&self, id: &str, name: &str) -> Result<bool> {
        info!("Removing container {}", name);
        match with_deadline(self.timeout, "remove", name, self.runtime.remove(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
