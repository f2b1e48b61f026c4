//! Pipeline orchestration
//!
//! Mode selection, daemon gate, login, the selected mode, cleanup, then
//! post-push hooks. Configuration conflicts are rejected before any
//! subprocess runs.

use crate::commands::{CommandBuilder, inject_proxy_build_args};
use crate::credentials::{DOCKER_HOME, ssh_home, write_ssh_key};
use crate::daemon::{ReadinessPolicy, ensure_daemon};
use crate::error::Result;
use crate::executor::{Cancellation, CommandRunner, ExecutionReport, Executor, ProcessRunner};
use crate::facts::{PipelineResult, PostPushHook, RegistryType};
use crate::login::LoginPhase;
use crate::mode::{self, ExecutionMode, ModeFlags, PushOutcome};
use crate::model::{BaseImageCredentials, BuildSpec, BuildxConfig, DaemonConfig, LoginCredentials, ProxyEnv};
use crate::reference::extract_registry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a run needs, validated by the configuration layer.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub build: BuildSpec,
    pub daemon: DaemonConfig,
    pub login: LoginCredentials,
    pub base_image: BaseImageCredentials,
    pub buildx: BuildxConfig,
    pub mode: ModeFlags,
    /// Remove built images and prune after a successful build
    pub cleanup: bool,
    pub proxy: ProxyEnv,
    pub registry_type: RegistryType,
    pub docker_home: PathBuf,
    pub ssh_home: PathBuf,
    pub readiness: ReadinessPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build: BuildSpec::default(),
            daemon: DaemonConfig::default(),
            login: LoginCredentials::default(),
            base_image: BaseImageCredentials::default(),
            buildx: BuildxConfig::default(),
            mode: ModeFlags::default(),
            cleanup: false,
            proxy: ProxyEnv::default(),
            registry_type: RegistryType::default(),
            docker_home: PathBuf::from(DOCKER_HOME),
            ssh_home: ssh_home(),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Registry reported in the outbound facts.
    pub fn registry(&self) -> String {
        if !self.login.registry.is_empty() {
            return self.login.registry.clone();
        }
        extract_registry(&self.build.repo)
    }
}

/// Squash guard, proxy build args and the SSH key, applied once before the
/// build steps are constructed.
pub fn prepare_build(
    spec: &mut BuildSpec,
    daemon: &DaemonConfig,
    proxy: &ProxyEnv,
    ssh_home: &Path,
) -> Result<()> {
    if spec.temp_tag.is_empty() {
        spec.temp_tag = BuildSpec::generate_temp_tag();
    }

    if spec.squash && !daemon.experimental {
        tracing::warn!(
            "Squash build flag is only available when the daemon is started with the experimental flag. Ignoring..."
        );
        spec.squash = false;
    }

    inject_proxy_build_args(&mut spec.args, proxy);

    if spec.ssh_key_path.is_none()
        && let Some(key) = spec.ssh_agent_key.as_deref()
    {
        spec.ssh_key_path = Some(write_ssh_key(ssh_home, key)?);
    }
    Ok(())
}

pub struct Pipeline {
    executor: Executor,
    commands: CommandBuilder,
    hooks: Vec<Arc<dyn PostPushHook>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Arc::new(ProcessRunner))
    }
}

impl Pipeline {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            executor: Executor::new(runner),
            commands: CommandBuilder::default(),
            hooks: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: CommandBuilder) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.executor = self.executor.with_cancellation(cancellation);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostPushHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        self.executor.cancellation()
    }

    pub async fn run(&self, mut config: PipelineConfig) -> Result<PipelineResult> {
        let selected = config.mode.select()?;
        selected.preflight(&config.login)?;
        tracing::info!("Running in {} mode", selected.name());

        ensure_daemon(&self.executor, &self.commands, &config.daemon, config.readiness).await?;

        LoginPhase::new(&self.executor, &self.commands, &config.docker_home)
            .run(&config.login, &config.base_image, selected.is_push_only())
            .await?;

        let mut report = ExecutionReport::default();
        let outcome = match &selected {
            ExecutionMode::BuildAndPush => {
                prepare_build(
                    &mut config.build,
                    &config.daemon,
                    &config.proxy,
                    &config.ssh_home,
                )?;
                mode::build_and_push(
                    &self.executor,
                    &self.commands,
                    &config.build,
                    &config.buildx,
                    config.mode.dry_run,
                    &mut report,
                )
                .await?
            }
            ExecutionMode::PushOnly { source_image } => {
                mode::push_only(
                    &self.executor,
                    &self.commands,
                    &config.build,
                    source_image.as_deref(),
                )
                .await?
            }
            ExecutionMode::LocalTarballPush { archive } => {
                mode::tarball_push(&self.executor, &self.commands, &config.build, archive).await?
            }
        };

        if config.cleanup && selected == ExecutionMode::BuildAndPush {
            let steps = self.commands.cleanup(&config.build);
            self.executor.run_steps(&steps, &mut report).await?;
        }

        let result = self.finish(&config, outcome, report);
        self.run_hooks(&config, result).await
    }

    fn finish(
        &self,
        config: &PipelineConfig,
        outcome: PushOutcome,
        report: ExecutionReport,
    ) -> PipelineResult {
        if outcome.digest.is_none() && !outcome.pushed_tags.is_empty() {
            tracing::warn!("Image digest unavailable, downstream artifacts will lack it");
        }
        PipelineResult {
            digest: outcome.digest,
            pushed_tags: outcome.pushed_tags,
            repo: config.build.repo.clone(),
            registry: config.registry(),
            registry_type: config.registry_type.clone(),
            warnings: report.warnings,
        }
    }

    async fn run_hooks(
        &self,
        config: &PipelineConfig,
        mut result: PipelineResult,
    ) -> Result<PipelineResult> {
        if config.mode.dry_run || result.pushed_tags.is_empty() {
            return Ok(result);
        }
        for hook in &self.hooks {
            if let Err(e) = hook.after_push(&result).await {
                let warning = format!("Post-push hook {} failed: {}", hook.name(), e);
                tracing::warn!("{}", warning);
                result.warnings.push(warning);
            }
        }
        Ok(result)
    }
}
