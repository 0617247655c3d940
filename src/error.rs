//! Error type shared by every layer of the crate.
//!
//! Variants fall into four groups: configuration problems found before the
//! daemon is contacted, daemon connectivity failures, daemon operation
//! failures, and the `Service` wrapper that pins an error to a workspace
//! service.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Configuration
    #[error("invalid port mapping '{input}': {reason}")]
    InvalidPortMapping { input: String, reason: String },

    #[error("host port {host_port} is mapped to both container port {first} and {second}")]
    PortConflict {
        host_port: u16,
        first: u16,
        second: u16,
    },

    #[error("port conflicts between services: {}", format_conflicts(.0))]
    CrossServicePortConflicts(BTreeMap<u16, Vec<String>>),

    #[error("service '{service}' path {path} escapes the workspace directory")]
    PathTraversal { service: String, path: PathBuf },

    #[error("unsupported workspace version '{found}' (expected '{supported}')")]
    UnsupportedWorkspaceVersion { found: String, supported: String },

    #[error("workspace {0} declares no services")]
    EmptyWorkspace(PathBuf),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("invalid descriptor {path}: {reason}")]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Daemon connectivity
    #[error("cannot connect to container daemon: {0}")]
    DaemonConnect(String),

    #[error("{operation} on '{target}' timed out after {timeout:?}")]
    DaemonTimeout {
        operation: &'static str,
        target: String,
        timeout: Duration,
    },

    // Daemon operations
    #[error("{operation} on '{target}' failed: {message}")]
    Daemon {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("no such container or image: {0}")]
    NotFound(String),

    #[error("image '{image}' must be built but no image builder is configured")]
    BuildUnavailable { image: String },

    #[error("lifecycle hook in '{container}' exited with status {exit_code}")]
    HookFailed { container: String, exit_code: i64 },

    #[error("service '{0}' has no running container")]
    ServiceNotRunning(String),

    #[error("service '{service}' has {count} running containers")]
    AmbiguousService { service: String, count: usize },

    #[error("service '{service}': {source}")]
    Service {
        service: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn for_service(self, service: impl Into<String>) -> Self {
        Error::Service {
            service: service.into(),
            source: Box::new(self),
        }
    }

    /// True when the daemon reported that the target does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Service { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for errors raised before any daemon interaction.
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::InvalidPortMapping { .. }
            | Error::PortConflict { .. }
            | Error::CrossServicePortConflicts(_)
            | Error::PathTraversal { .. }
            | Error::UnsupportedWorkspaceVersion { .. }
            | Error::EmptyWorkspace(_)
            | Error::UnknownService(_)
            | Error::InvalidDescriptor { .. }
            | Error::Io { .. } => true,
            Error::Service { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

fn format_conflicts(conflicts: &BTreeMap<u16, Vec<String>>) -> String {
    conflicts
        .iter()
        .map(|(port, services)| format!("{} claimed by {}", port, services.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
