//! Single-service `up`/`down`.
//!
//! Glues the resolver, port reconciliation, blueprint builder, image plan and
//! lifecycle manager together for one project directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::blueprint::{build_blueprint, BlueprintMode, SHELL};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleManager, StoppedPolicy, UpAction, UpOutcome};
use crate::naming::{container_name, prefixed_name, ContainerKind, NamingContext};
use crate::ports::{self, PortMapping};
use crate::providers::ProviderRegistry;
use crate::resolver::ConfigResolver;
use crate::runtime::{with_deadline, ContainerRuntime};
use crate::types::{
    BuildSpec, ContainerBlueprint, ContainerState, ResolvedConfig, LABEL_ACCOUNT, LABEL_MANAGED,
    LABEL_PROJECT,
};

/// Pulls get more time than ordinary daemon calls.
const PULL_TIMEOUT_FACTOR: u32 = 10;
const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything needed to bring one service up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUpRequest {
    pub project_dir: PathBuf,
    pub account: Option<String>,
    /// Replaces kind-based naming, e.g. `reactor-ws-api-`.
    pub name_prefix: Option<String>,
    pub port_overrides: Vec<PortMapping>,
    pub force_rebuild: bool,
    pub discovery: bool,
    pub docker_host_integration: bool,
    pub labels: BTreeMap<String, String>,
    pub verbose: bool,
}

impl ServiceUpRequest {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Default::default()
        }
    }
}

/// How the run image will be made available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePlan {
    UseLocal(String),
    Pull(String),
    Build { spec: BuildSpec, tag: String },
}

pub fn plan_image(
    resolved: &ResolvedConfig,
    force_rebuild: bool,
    image_present: bool,
) -> ImagePlan {
    let image = resolved.run_image();
    match &resolved.build {
        Some(spec) if force_rebuild || !image_present => ImagePlan::Build {
            spec: spec.clone(),
            tag: image,
        },
        Some(_) => ImagePlan::UseLocal(image),
        None if image_present => ImagePlan::UseLocal(image),
        None => ImagePlan::Pull(image),
    }
}

/// Executes image builds; the build plumbing itself lives outside this crate.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, spec: &BuildSpec, tag: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct ServiceRunner {
    lifecycle: LifecycleManager<dyn ContainerRuntime>,
    resolver: Arc<dyn ConfigResolver>,
    builder: Option<Arc<dyn ImageBuilder>>,
    providers: ProviderRegistry,
    naming: NamingContext,
    hook_timeout: Duration,
}

impl ServiceRunner {
    pub fn new(
        lifecycle: LifecycleManager<dyn ContainerRuntime>,
        resolver: Arc<dyn ConfigResolver>,
    ) -> Self {
        Self {
            lifecycle,
            resolver,
            builder: None,
            providers: ProviderRegistry::builtin(),
            naming: NamingContext::default(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_naming(mut self, naming: NamingContext) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn lifecycle(&self) -> &LifecycleManager<dyn ContainerRuntime> {
        &self.lifecycle
    }

    pub fn resolver(&self) -> &Arc<dyn ConfigResolver> {
        &self.resolver
    }

    pub fn resolve(&self, request: &ServiceUpRequest) -> Result<ResolvedConfig> {
        self.resolver
            .resolve(&request.project_dir, request.account.as_deref())
    }

    pub async fn up(&self, request: &ServiceUpRequest) -> Result<UpOutcome> {
        let resolved = self.resolve(request)?;
        self.up_resolved(request, resolved).await
    }

    /// `up` for a config the caller already resolved.
    pub async fn up_resolved(
        &self,
        request: &ServiceUpRequest,
        resolved: ResolvedConfig,
    ) -> Result<UpOutcome> {
        let blueprint = self.blueprint(request, resolved.clone())?;
        let name = blueprint.name.as_str();
        if request.verbose {
            info!("Blueprint for {}: {:?}", name, blueprint);
        } else {
            debug!("Blueprint for {}: {:?}", name, blueprint);
        }

        let existing = if request.force_rebuild {
            info!("Force rebuild requested for {}", name);
            self.lifecycle.down(name).await?;
            None
        } else {
            self.lifecycle.discover(name).await?
        };
        let needs_image = match existing {
            None => true,
            Some(record) => {
                record.state == ContainerState::Stopped
                    && self.lifecycle_policy() == StoppedPolicy::Recreate
            }
        };
        if needs_image {
            self.ensure_image(&resolved, request.force_rebuild).await?;
        }

        let outcome = self.lifecycle.up(&blueprint).await?;
        if outcome.action == UpAction::Created {
            if let Some(hook) = resolved.post_create_command.as_deref() {
                if let Err(e) = self.run_hook(&blueprint, hook, request.verbose).await {
                    // The next `up` must recreate it and rerun the hook.
                    warn!("Removing {} after failed post-create command", name);
                    if let Err(cleanup) = self.lifecycle.down(name).await {
                        warn!("Cleanup of {} failed: {}", name, cleanup);
                    }
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    /// Builds the final execution request: merged ports, name and labels.
    pub fn blueprint(
        &self,
        request: &ServiceUpRequest,
        resolved: ResolvedConfig,
    ) -> Result<ContainerBlueprint> {
        let merged = ports::merge(&resolved.ports, &request.port_overrides);
        ports::validate_no_conflicts(&merged)?;
        let resolved = ResolvedConfig {
            ports: merged,
            ..resolved
        };

        let mode = BlueprintMode {
            discovery: request.discovery,
            docker_host_integration: request.docker_host_integration,
        };
        let name = self.name_for(request, &resolved);
        let mut blueprint = build_blueprint(&resolved, mode, &self.providers, name);
        blueprint.labels = labels_for(request, &resolved);
        Ok(blueprint)
    }

    fn name_for(&self, request: &ServiceUpRequest, resolved: &ResolvedConfig) -> String {
        match &request.name_prefix {
            Some(prefix) => prefixed_name(&self.naming, prefix, &resolved.project_hash),
            None => {
                let kind = if request.discovery {
                    ContainerKind::Discovery
                } else {
                    ContainerKind::Standard
                };
                container_name(
                    &self.naming,
                    &kind,
                    &resolved.account,
                    &resolved.project_root,
                    &resolved.project_hash,
                )
            }
        }
    }

    fn lifecycle_policy(&self) -> StoppedPolicy {
        self.lifecycle.stopped_policy()
    }

    async fn ensure_image(&self, resolved: &ResolvedConfig, force_rebuild: bool) -> Result<()> {
        let image = resolved.run_image();
        let runtime = self.lifecycle.runtime();
        let timeout = self.lifecycle.timeout();
        let present = with_deadline(timeout, "inspect_image", &image, runtime.image_exists(&image))
            .await?;

        match plan_image(resolved, force_rebuild, present) {
            ImagePlan::UseLocal(_) => Ok(()),
            ImagePlan::Pull(image) => {
                with_deadline(
                    timeout * PULL_TIMEOUT_FACTOR,
                    "pull_image",
                    &image,
                    runtime.pull_image(&image),
                )
                .await
            }
            ImagePlan::Build { spec, tag } => match &self.builder {
                Some(builder) => {
                    info!("Building image {} from {}", tag, spec.dockerfile.display());
                    builder.build(&spec, &tag).await
                }
                None => Err(Error::BuildUnavailable { image: tag }),
            },
        }
    }

    async fn run_hook(
        &self,
        blueprint: &ContainerBlueprint,
        hook: &str,
        verbose: bool,
    ) -> Result<()> {
        info!("Running post-create command in {}", blueprint.name);
        let command = vec![SHELL.to_string(), "-c".to_string(), hook.to_string()];
        let runtime = self.lifecycle.runtime();
        let result = with_deadline(
            self.hook_timeout,
            "exec",
            &blueprint.name,
            runtime.exec(&blueprint.name, &command, Some(&blueprint.user)),
        )
        .await?;
        if verbose && !result.output.is_empty() {
            info!("{}: {}", blueprint.name, result.output.trim_end());
        }
        if !result.success() {
            warn!(
                "Post-create command failed in {}: {}",
                blueprint.name,
                result.output.trim_end()
            );
            return Err(Error::HookFailed {
                container: blueprint.name.clone(),
                exit_code: result.exit_code,
            });
        }
        Ok(())
    }

    /// Tears down the container for a project; absent containers are fine.
    pub async fn down(
        &self,
        project_dir: &Path,
        account: Option<&str>,
        discovery: bool,
    ) -> Result<bool> {
        let request = ServiceUpRequest {
            project_dir: project_dir.to_path_buf(),
            account: account.map(str::to_string),
            discovery,
            ..Default::default()
        };
        let resolved = self.resolve(&request)?;
        let name = self.name_for(&request, &resolved);
        self.lifecycle.down(&name).await
    }
}

fn labels_for(request: &ServiceUpRequest, resolved: &ResolvedConfig) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    labels.insert(LABEL_ACCOUNT.to_string(), resolved.account.clone());
    labels.insert(LABEL_PROJECT.to_string(), resolved.project_hash.clone());
    labels.extend(request.labels.clone());
    labels
}
