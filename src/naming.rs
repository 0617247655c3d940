//! Deterministic container names and project hashes.
//!
//! Recovery looks containers up by name, so every function here must map
//! identical inputs to identical outputs. The test-isolation prefix is passed
//! in through [`NamingContext`] rather than read from the environment.

use std::path::Path;

use sha2::{Digest, Sha256};

const NAME_ROOT: &str = "reactor";
const FALLBACK_PROJECT: &str = "project";
const MAX_PROJECT_LEN: usize = 20;
const MAX_COMPONENT_LEN: usize = 32;
/// Upper bound for any generated container name.
pub const MAX_NAME_LEN: usize = 128;

/// Which naming scheme a container follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    Standard,
    Discovery,
    WorkspaceService(String),
}

/// Injected naming settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingContext {
    pub isolation_prefix: Option<String>,
}

impl NamingContext {
    pub fn new(isolation_prefix: Option<String>) -> Self {
        Self {
            isolation_prefix: isolation_prefix.filter(|p| !p.trim().is_empty()),
        }
    }

    fn apply(&self, name: String) -> String {
        let name = match &self.isolation_prefix {
            Some(prefix) => format!("{}-{}", sanitize_component(prefix, "test"), name),
            None => name,
        };
        truncate_name(name)
    }
}

/// Eight hex characters of SHA-256 over the absolute path.
pub fn project_hash(path: &Path) -> String {
    short_hash(&path.to_string_lossy(), 8)
}

pub(crate) fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_separator(c: char) -> bool {
    matches!(c, '_' | '.' | '-')
}

fn replace_illegal(input: &str) -> String {
    input
        .chars()
        .map(|c| if is_name_char(c) { c } else { '-' })
        .collect()
}

/// Turns the final segment of a project path into a name fragment.
pub fn sanitize_project_name(input: &str) -> String {
    let mut name = replace_illegal(input);
    if name.is_empty() {
        return FALLBACK_PROJECT.to_string();
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        name = format!("{}-{}", FALLBACK_PROJECT, name);
    }
    name.truncate(MAX_PROJECT_LEN);
    let trimmed = name.trim_end_matches(is_separator);
    if trimmed.is_empty() {
        FALLBACK_PROJECT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitizes an account, service or prefix value for use inside a name.
pub fn sanitize_component(input: &str, fallback: &str) -> String {
    let mut value = replace_illegal(input);
    value.truncate(MAX_COMPONENT_LEN);
    let trimmed = value.trim_matches(is_separator);
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn truncate_name(mut name: String) -> String {
    name.truncate(MAX_NAME_LEN);
    while name.ends_with(is_separator) {
        name.pop();
    }
    name
}

fn project_segment(project_path: &Path) -> String {
    let last = project_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_project_name(&last)
}

/// Prefix shared by every container of one workspace service.
pub fn workspace_name_prefix(service: &str) -> String {
    format!("{}-ws-{}-", NAME_ROOT, sanitize_component(service, "service"))
}

/// Builds the deterministic container name for a project.
pub fn container_name(
    ctx: &NamingContext,
    kind: &ContainerKind,
    account: &str,
    project_path: &Path,
    project_hash: &str,
) -> String {
    let account = sanitize_component(account, "default");
    let name = match kind {
        ContainerKind::Standard => format!(
            "{}-{}-{}-{}",
            NAME_ROOT,
            account,
            project_segment(project_path),
            project_hash
        ),
        ContainerKind::Discovery => format!(
            "{}-discovery-{}-{}-{}",
            NAME_ROOT,
            account,
            project_segment(project_path),
            project_hash
        ),
        ContainerKind::WorkspaceService(service) => {
            format!("{}{}", workspace_name_prefix(service), project_hash)
        }
    };
    ctx.apply(name)
}

/// Name for a caller-supplied prefix such as `reactor-ws-api-`.
pub fn prefixed_name(ctx: &NamingContext, prefix: &str, project_hash: &str) -> String {
    let prefix = replace_illegal(prefix);
    let name = if prefix.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        format!("{}{}", prefix, project_hash)
    } else {
        format!("{}-{}{}", NAME_ROOT, prefix.trim_start_matches(is_separator), project_hash)
    };
    ctx.apply(name)
}

/// Checks the daemon's `[a-zA-Z0-9][a-zA-Z0-9_.-]*` rule and our length bound.
pub fn is_valid_container_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.chars().all(is_name_char)
}
