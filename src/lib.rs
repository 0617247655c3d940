//! Reactor: containerized development environments on a local Docker daemon.
//!
//! A single project goes through [`service::ServiceRunner`]: its resolved
//! configuration becomes a [`types::ContainerBlueprint`], and the
//! [`lifecycle::LifecycleManager`] reuses, restarts or creates the container
//! behind the blueprint's deterministic name. Several projects form a
//! [`workspace::Workspace`], driven concurrently by the
//! [`orchestrator::Orchestrator`] and tracked through container labels.

pub mod blueprint;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod orchestrator;
pub mod ports;
pub mod providers;
pub mod resolver;
pub mod runtime;
pub mod service;
pub mod types;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleManager, StoppedPolicy, UpAction, UpOutcome};
pub use orchestrator::{Orchestrator, WorkspaceReport, WorkspaceUpOptions};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use service::{ServiceRunner, ServiceUpRequest};
pub use workspace::Workspace;
