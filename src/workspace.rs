//! Workspace descriptors: a named set of service projects managed together.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::short_hash;

pub const SUPPORTED_VERSION: &str = "1";
const INSTANCE_ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceEntry {
    /// Relative to the workspace file's directory.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkspaceFile {
    pub version: String,
    pub services: BTreeMap<String, ServiceEntry>,
}

/// A validated workspace descriptor anchored at its canonical file path.
#[derive(Debug, Clone)]
pub struct Workspace {
    file: PathBuf,
    root: PathBuf,
    descriptor: WorkspaceFile,
}

impl Workspace {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let descriptor: WorkspaceFile =
            serde_json::from_str(&raw).map_err(|e| Error::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::from_descriptor(path, descriptor)
    }

    /// Validates an already-parsed descriptor located at `path`.
    pub fn from_descriptor(path: impl AsRef<Path>, descriptor: WorkspaceFile) -> Result<Self> {
        let path = path.as_ref();
        if descriptor.version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedWorkspaceVersion {
                found: descriptor.version,
                supported: SUPPORTED_VERSION.to_string(),
            });
        }
        if descriptor.services.is_empty() {
            return Err(Error::EmptyWorkspace(path.to_path_buf()));
        }
        let file = std::fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        let root = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidDescriptor {
                path: file.clone(),
                reason: "workspace file has no parent directory".into(),
            })?;
        Ok(Self {
            file,
            root,
            descriptor,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn services(&self) -> &BTreeMap<String, ServiceEntry> {
        &self.descriptor.services
    }

    /// Stable label value shared by every container of this workspace.
    pub fn instance_id(&self) -> String {
        short_hash(&self.file.to_string_lossy(), INSTANCE_ID_LEN)
    }

    /// The requested services, de-duplicated in workspace order. An empty
    /// selection means every service.
    pub fn select(&self, names: &[String]) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(self.descriptor.services.keys().cloned().collect());
        }
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        if let Some(unknown) = wanted
            .iter()
            .find(|n| !self.descriptor.services.contains_key(**n))
        {
            return Err(Error::UnknownService(unknown.to_string()));
        }
        Ok(wanted.into_iter().map(str::to_string).collect())
    }

    pub fn entry(&self, service: &str) -> Result<&ServiceEntry> {
        self.descriptor
            .services
            .get(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))
    }

    /// Absolute project directory for `service`, which must stay inside the
    /// workspace directory both lexically and after resolving symlinks.
    pub fn service_dir(&self, service: &str) -> Result<PathBuf> {
        let entry = self.entry(service)?;
        let traversal = || Error::PathTraversal {
            service: service.to_string(),
            path: entry.path.clone(),
        };

        let joined = normalize(&self.root.join(&entry.path)).ok_or_else(traversal)?;
        if !joined.starts_with(&self.root) {
            return Err(traversal());
        }
        let resolved = std::fs::canonicalize(&joined).map_err(|e| Error::io(&joined, e))?;
        if !resolved.starts_with(&self.root) {
            return Err(traversal());
        }
        if !resolved.is_dir() {
            return Err(Error::InvalidDescriptor {
                path: resolved,
                reason: format!("service '{}' path is not a directory", service),
            });
        }
        Ok(resolved)
    }
}

/// Lexically resolves `.` and `..`; `None` if `..` climbs above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
