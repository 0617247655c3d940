use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{ContainerBlueprint, ContainerRecord, ExecOutput};

pub mod docker;
pub use docker::DockerRuntime;

/// The container daemon as seen by the lifecycle manager and orchestrator.
///
/// Implementations must be safe to share across concurrently running
/// services. A missing target is reported as [`Error::NotFound`], except by
/// `inspect`, which returns `None`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Looks a container up by exact name or id.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerRecord>>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates (but does not start) a container and returns its id.
    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Stops a container; stopping one that is not running succeeds.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Lists containers, running or not, carrying every given label.
    async fn list(&self, labels: &[(String, String)]) -> Result<Vec<ContainerRecord>>;

    async fn exec(&self, id: &str, command: &[String], user: Option<&str>) -> Result<ExecOutput>;
}

/// Bounds a daemon call by `timeout`, reporting expiry as [`Error::DaemonTimeout`].
pub async fn with_deadline<T, F>(
    timeout: Duration,
    operation: &'static str,
    target: &str,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::DaemonTimeout {
            operation,
            target: target.to_string(),
            timeout,
        }),
    }
}
