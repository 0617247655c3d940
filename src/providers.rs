//! Credential providers whose state is persisted per account and project.
//!
//! The registry is an ordered list so mount order is stable across runs.

/// A directory or file under the project config dir mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Relative to the per-project config directory.
    pub source: String,
    /// Absolute path inside the container.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialProvider {
    pub name: String,
    pub mount_points: Vec<MountPoint>,
}

impl CredentialProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_points: Vec::new(),
        }
    }

    pub fn mount(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.mount_points.push(MountPoint {
            source: source.into(),
            target: target.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRegistry {
    providers: Vec<CredentialProvider>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Providers shipped with reactor.
    pub fn builtin() -> Self {
        Self::empty()
            .register(
                CredentialProvider::new("claude")
                    .mount("claude", "/home/claude/.claude")
                    .mount("claude.json", "/home/claude/.claude.json"),
            )
            .register(CredentialProvider::new("gemini").mount("gemini", "/home/claude/.gemini"))
            .register(CredentialProvider::new("gh").mount("gh", "/home/claude/.config/gh"))
    }

    /// Adds a provider, replacing one with the same name in its original slot.
    pub fn register(mut self, provider: CredentialProvider) -> Self {
        match self.providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => *existing = provider,
            None => self.providers.push(provider),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &CredentialProvider> {
        self.providers.iter()
    }

    pub fn mount_point_count(&self) -> usize {
        self.providers.iter().map(|p| p.mount_points.len()).sum()
    }
}
