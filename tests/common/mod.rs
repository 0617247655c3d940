//! In-memory daemon used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use reactor::error::{Error, Result};
use reactor::lifecycle::LifecycleManager;
use reactor::naming::NamingContext;
use reactor::resolver::DevcontainerResolver;
use reactor::runtime::ContainerRuntime;
use reactor::service::ServiceRunner;
use reactor::types::{ContainerBlueprint, ContainerRecord, ContainerState, ExecOutput};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub blueprint: ContainerBlueprint,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    missing_images: BTreeSet<String>,
    failing_creates: BTreeSet<String>,
    /// `(operation, None)` hangs every call, `Some(target)` only that target.
    hanging: BTreeSet<(&'static str, Option<String>)>,
    exec_exit_code: i64,
    calls: Vec<(&'static str, String)>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Seeds a container as if a previous run had created it.
    pub fn seed(&self, name: &str, running: bool, labels: &[(&str, &str)]) -> String {
        self.with_state(|s| {
            s.next_id += 1;
            let id = format!("seed{:04}", s.next_id);
            let blueprint = ContainerBlueprint {
                name: name.to_string(),
                image: "seed:latest".to_string(),
                command: vec!["/bin/bash".to_string()],
                working_dir: "/app".to_string(),
                user: "claude".to_string(),
                env: Vec::new(),
                mounts: Vec::new(),
                ports: Vec::new(),
                network_mode: "bridge".to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            };
            s.containers.push(FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                running,
                blueprint,
            });
            id
        })
    }

    pub fn mark_image_missing(&self, image: &str) {
        self.with_state(|s| s.missing_images.insert(image.to_string()));
    }

    pub fn fail_create(&self, name: &str) {
        self.with_state(|s| s.failing_creates.insert(name.to_string()));
    }

    pub fn hang_on(&self, operation: &'static str) {
        self.with_state(|s| s.hanging.insert((operation, None)));
    }

    pub fn hang_on_target(&self, operation: &'static str, target: &str) {
        self.with_state(|s| s.hanging.insert((operation, Some(target.to_string()))));
    }

    pub fn clear_hangs(&self) {
        self.with_state(|s| s.hanging.clear());
    }

    pub fn set_exec_exit_code(&self, code: i64) {
        self.with_state(|s| s.exec_exit_code = code);
    }

    /// Simulates `docker stop` issued outside of reactor.
    pub fn stop_externally(&self, name: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.iter_mut().find(|c| c.name == name) {
                c.running = false;
            }
        });
    }

    pub fn remove_externally(&self, name: &str) {
        self.with_state(|s| s.containers.retain(|c| c.name != name));
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.with_state(|s| s.containers.clone())
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.with_state(|s| s.containers.iter().find(|c| c.name == name).cloned())
    }

    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn count(&self, operation: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|(op, _)| *op == operation).count())
    }

    pub fn reset_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    async fn enter(&self, operation: &'static str, target: &str) {
        let hang = self.with_state(|s| {
            s.calls.push((operation, target.to_string()));
            s.hanging.contains(&(operation, None))
                || s.hanging.contains(&(operation, Some(target.to_string())))
        });
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

fn matches(c: &FakeContainer, key: &str) -> bool {
    c.id == key || c.name == key
}

fn record(c: &FakeContainer) -> ContainerRecord {
    ContainerRecord {
        id: c.id.clone(),
        name: c.name.clone(),
        state: if c.running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        },
        image: c.blueprint.image.clone(),
        labels: c.blueprint.labels.clone(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerRecord>> {
        self.enter("inspect", name).await;
        Ok(self.with_state(|s| s.containers.iter().find(|c| matches(c, name)).map(record)))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.enter("image_exists", image).await;
        Ok(self.with_state(|s| !s.missing_images.contains(image)))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.enter("pull_image", image).await;
        self.with_state(|s| s.missing_images.remove(image));
        Ok(())
    }

    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String> {
        self.enter("create", &blueprint.name).await;
        self.with_state(|s| {
            if s.failing_creates.contains(&blueprint.name) {
                return Err(Error::Daemon {
                    operation: "create",
                    target: blueprint.name.clone(),
                    message: "simulated failure".into(),
                });
            }
            if s.containers.iter().any(|c| c.name == blueprint.name) {
                return Err(Error::Daemon {
                    operation: "create",
                    target: blueprint.name.clone(),
                    message: "name already in use".into(),
                });
            }
            s.next_id += 1;
            let id = format!("ctr{:04}", s.next_id);
            s.containers.push(FakeContainer {
                id: id.clone(),
                name: blueprint.name.clone(),
                running: false,
                blueprint: blueprint.clone(),
            });
            Ok(id)
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.enter("start", id).await;
        self.with_state(|s| match s.containers.iter_mut().find(|c| matches(c, id)) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(Error::NotFound(id.to_string())),
        })
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        self.enter("stop", id).await;
        self.with_state(|s| match s.containers.iter_mut().find(|c| matches(c, id)) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(Error::NotFound(id.to_string())),
        })
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.enter("remove", id).await;
        self.with_state(|s| {
            let before = s.containers.len();
            s.containers.retain(|c| !matches(c, id));
            if s.containers.len() == before {
                Err(Error::NotFound(id.to_string()))
            } else {
                Ok(())
            }
        })
    }

    async fn list(&self, labels: &[(String, String)]) -> Result<Vec<ContainerRecord>> {
        self.enter("list", "containers").await;
        Ok(self.with_state(|s| {
            s.containers
                .iter()
                .filter(|c| {
                    labels
                        .iter()
                        .all(|(k, v)| c.blueprint.labels.get(k) == Some(v))
                })
                .map(record)
                .collect()
        }))
    }

    async fn exec(&self, id: &str, command: &[String], _user: Option<&str>) -> Result<ExecOutput> {
        self.enter("exec", id).await;
        self.with_state(|s| {
            let c = s
                .containers
                .iter()
                .find(|c| matches(c, id))
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if !c.running {
                return Err(Error::Daemon {
                    operation: "exec",
                    target: id.to_string(),
                    message: "container is not running".into(),
                });
            }
            Ok(ExecOutput {
                exit_code: s.exec_exit_code,
                output: format!("{}\n", command.join(" ")),
            })
        })
    }
}

/// Writes `.devcontainer/devcontainer.json` under `root/rel` and returns the dir.
pub fn write_project(root: &Path, rel: &str, descriptor: &str) -> PathBuf {
    let dir = root.join(rel);
    std::fs::create_dir_all(dir.join(".devcontainer")).unwrap();
    std::fs::write(dir.join(".devcontainer/devcontainer.json"), descriptor).unwrap();
    dir
}

pub fn lifecycle(fake: &Arc<FakeRuntime>) -> LifecycleManager<dyn ContainerRuntime> {
    lifecycle_with_timeout(fake, Duration::from_secs(5))
}

pub fn lifecycle_with_timeout(
    fake: &Arc<FakeRuntime>,
    timeout: Duration,
) -> LifecycleManager<dyn ContainerRuntime> {
    let runtime: Arc<dyn ContainerRuntime> = fake.clone();
    LifecycleManager::new(runtime, timeout).with_stop_grace(Duration::ZERO)
}

pub fn runner(fake: &Arc<FakeRuntime>, config_root: &Path) -> ServiceRunner {
    runner_with_timeout(fake, config_root, Duration::from_secs(5))
}

pub fn runner_with_timeout(
    fake: &Arc<FakeRuntime>,
    config_root: &Path,
    timeout: Duration,
) -> ServiceRunner {
    let resolver = Arc::new(DevcontainerResolver::new(config_root, "default"));
    ServiceRunner::new(lifecycle_with_timeout(fake, timeout), resolver)
        .with_naming(NamingContext::new(Some("t".into())))
}

pub fn labels_of(c: &FakeContainer) -> &BTreeMap<String, String> {
    &c.blueprint.labels
}
