//! Step construction for every external operation
//!
//! Pure functions: nothing here spawns a process or touches the filesystem.
//! The returned [`CommandStep`]s are run by the executor.

use crate::builder::BuilderHandle;
use crate::model::{BuildSpec, BuildxConfig, DaemonConfig, ProxyEnv};
use crate::step::{CommandStep, StepKind};
use chrono::{DateTime, SecondsFormat, Utc};

pub const DOCKER_EXE: &str = "/usr/local/bin/docker";
pub const DOCKERD_EXE: &str = "/usr/local/bin/dockerd";
pub const DOCKER_SOCKET_HOST: &str = "--host=unix:///var/run/docker.sock";
pub const LABEL_PREFIX: &str = "org.opencontainers.image";
pub const ACCESS_TOKEN_USER: &str = "oauth2accesstoken";

/// Builds [`CommandStep`]s against a fixed pair of executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    docker: String,
    dockerd: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DOCKER_EXE, DOCKERD_EXE)
    }
}

impl CommandBuilder {
    pub fn new(docker: impl Into<String>, dockerd: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            dockerd: dockerd.into(),
        }
    }

    pub fn docker(&self) -> &str {
        &self.docker
    }

    fn docker_step<I, S>(&self, kind: StepKind, args: I) -> CommandStep
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandStep::fatal(kind, self.docker.clone(), args)
    }

    /// Daemon start command.
    pub fn daemon(&self, daemon: &DaemonConfig) -> CommandStep {
        let mut args = vec![
            "--data-root".to_string(),
            daemon.storage_path.display().to_string(),
            DOCKER_SOCKET_HOST.to_string(),
        ];

        if let Some(profile) = &daemon.seccomp_profile {
            args.push(format!("--seccomp-profile={}", profile.display()));
        }
        if let Some(driver) = daemon.storage_driver.as_deref().filter(|d| !d.is_empty()) {
            args.push("-s".into());
            args.push(driver.into());
        }
        if let Some(registry) = daemon.insecure_registry() {
            args.push("--insecure-registry".into());
            args.push(registry.into());
        }
        if daemon.ipv6 {
            args.push("--ipv6".into());
        }
        for mirror in &daemon.mirrors {
            args.push("--registry-mirror".into());
            args.push(mirror.clone());
        }
        if let Some(bip) = daemon.bip.as_deref().filter(|b| !b.is_empty()) {
            args.push("--bip".into());
            args.push(bip.into());
        }
        for dns in &daemon.dns {
            args.push("--dns".into());
            args.push(dns.clone());
        }
        for search in &daemon.dns_search {
            args.push("--dns-search".into());
            args.push(search.clone());
        }
        if let Some(mtu) = daemon.mtu.as_deref().filter(|m| !m.is_empty()) {
            args.push("--mtu".into());
            args.push(mtu.into());
        }
        if daemon.experimental {
            args.push("--experimental".into());
        }

        CommandStep::fatal(StepKind::Daemon, self.dockerd.clone(), args)
    }

    pub fn version(&self) -> CommandStep {
        self.docker_step(StepKind::Version, ["version"])
    }

    pub fn info(&self) -> CommandStep {
        self.docker_step(StepKind::Info, ["info"])
    }

    /// Username/password login, with the legacy email flag when given.
    pub fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> CommandStep {
        let mut args = vec!["login", "-u", username, "-p", password];
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            args.push("-e");
            args.push(email);
        }
        args.push(registry);
        self.docker_step(StepKind::Login, args)
    }

    /// OAuth-style login; the token goes over standard input.
    pub fn login_access_token(&self, registry: &str, access_token: &str) -> CommandStep {
        self.docker_step(
            StepKind::Login,
            ["login", "-u", ACCESS_TOKEN_USER, "--password-stdin", registry],
        )
        .with_stdin(access_token)
    }

    /// Cache pre-pull. Never fails the run.
    pub fn pull(&self, image: &str) -> CommandStep {
        self.docker_step(StepKind::Pull, ["pull", image])
            .ignore_with_warning(format!("Could not pull cache-from image {}. Ignoring...", image))
    }

    /// Build step stamped with the current time.
    pub fn build(&self, spec: &BuildSpec, builder: &BuilderHandle) -> CommandStep {
        self.build_at(spec, builder, Utc::now())
    }

    /// Build step with an explicit label timestamp.
    ///
    /// Argument order:
    /// 1. `build --rm=true` (or `buildx build --builder <name> --load`)
    /// 2. `-f <dockerfile> -t <temp tag> <context>`
    /// 3. `--squash`, `--compress`, `--pull=true`, `--no-cache`
    /// 4. `--cache-from` per image
    /// 5. `--build-arg` per argument
    /// 6. `--add-host` per mapping
    /// 7. `--secret`: raw value, env-sourced, then file-sourced
    /// 8. `--target`, `--quiet`, `--platform`, `--ssh`
    /// 9. `--label`: auto labels, then explicit labels
    pub fn build_at(
        &self,
        spec: &BuildSpec,
        builder: &BuilderHandle,
        now: DateTime<Utc>,
    ) -> CommandStep {
        let mut args: Vec<String> = match builder {
            BuilderHandle::Default => vec!["build".into(), "--rm=true".into()],
            BuilderHandle::Ephemeral(name) => vec![
                "buildx".into(),
                "build".into(),
                "--builder".into(),
                name.clone(),
                "--load".into(),
            ],
        };
        let legacy = builder.is_default();

        args.push("-f".into());
        args.push(spec.dockerfile.display().to_string());
        args.push("-t".into());
        args.push(spec.temp_tag.clone());
        args.push(spec.context.display().to_string());

        if spec.squash && legacy {
            args.push("--squash".into());
        }
        if spec.compress && legacy {
            args.push("--compress".into());
        }
        if spec.pull {
            args.push("--pull=true".into());
        }
        if spec.no_cache {
            args.push("--no-cache".into());
        }
        for image in &spec.cache_from {
            args.push("--cache-from".into());
            args.push(image.clone());
        }
        for arg in &spec.args {
            args.push("--build-arg".into());
            args.push(arg.clone());
        }
        for host in &spec.add_hosts {
            args.push("--add-host".into());
            args.push(host.clone());
        }
        if let Some(secret) = spec.secret.as_deref().filter(|s| !s.is_empty()) {
            args.push("--secret".into());
            args.push(secret.into());
        }
        for secret in &spec.secrets {
            args.push("--secret".into());
            args.push(secret.to_arg());
        }
        if let Some(target) = spec.target.as_deref().filter(|t| !t.is_empty()) {
            args.push("--target".into());
            args.push(target.into());
        }
        if spec.quiet {
            args.push("--quiet".into());
        }
        if let Some(platform) = spec.platform.as_deref().filter(|p| !p.is_empty()) {
            args.push("--platform".into());
            args.push(platform.into());
        }
        if let Some(ssh) = spec.ssh_key_path.as_deref() {
            args.push("--ssh".into());
            args.push(ssh.into());
        }
        if spec.auto_label {
            for label in auto_labels(spec, now) {
                args.push("--label".into());
                args.push(label);
            }
        }
        for label in &spec.labels {
            args.push("--label".into());
            args.push(label.clone());
        }

        let step = self.docker_step(StepKind::Build, args);
        if spec.needs_buildkit() {
            step.with_env("DOCKER_BUILDKIT", "1")
        } else {
            step
        }
    }

    pub fn tag(&self, source: &str, target: &str) -> CommandStep {
        self.docker_step(StepKind::Tag, ["tag", source, target])
    }

    pub fn push(&self, target: &str) -> CommandStep {
        self.docker_step(StepKind::Push, ["push", target])
    }

    /// `system prune -f`. Never fails the run.
    pub fn prune(&self) -> CommandStep {
        self.docker_step(StepKind::Prune, ["system", "prune", "-f"])
            .ignore_with_warning("Could not prune system containers. Ignoring...")
    }

    /// `rmi <image>`. Never fails the run.
    pub fn remove_image(&self, image: &str) -> CommandStep {
        self.docker_step(StepKind::RemoveImage, ["rmi", image])
            .ignore_with_warning(format!("Could not remove image {}. Ignoring...", image))
    }

    pub fn save(&self, image: &str, archive: &str) -> CommandStep {
        self.docker_step(StepKind::Save, ["save", "-o", archive, image])
    }

    pub fn load(&self, archive: &str) -> CommandStep {
        self.docker_step(StepKind::Load, ["load", "-i", archive])
    }

    /// Prints the first repo digest of a local image.
    pub fn inspect_digest(&self, image: &str) -> CommandStep {
        self.docker_step(
            StepKind::Inspect,
            ["inspect", "--format={{index .RepoDigests 0}}", image],
        )
    }

    /// Exit status tells whether the image exists locally.
    pub fn image_exists(&self, image: &str) -> CommandStep {
        self.docker_step(StepKind::Inspect, ["image", "inspect", image])
    }

    pub fn builder_create(&self, name: &str, buildx: &BuildxConfig) -> CommandStep {
        let mut args = vec![
            "buildx".to_string(),
            "create".into(),
            "--use".into(),
            "--name".into(),
            name.into(),
            "--driver".into(),
            buildx.driver.clone(),
        ];
        if let Some(config) = &buildx.config_file {
            args.push("--config".into());
            args.push(config.display().to_string());
        }
        for opt in &buildx.driver_opts {
            args.push("--driver-opt".into());
            args.push(opt.clone());
        }
        self.docker_step(StepKind::BuilderCreate, args)
    }

    pub fn builder_inspect(&self, name: &str) -> CommandStep {
        self.docker_step(
            StepKind::BuilderInspect,
            ["buildx", "inspect", "--bootstrap", "--builder", name],
        )
    }

    pub fn builder_remove(&self, name: &str) -> CommandStep {
        self.docker_step(StepKind::BuilderRemove, ["buildx", "rm", name])
    }

    /// Full build-mode sequence: version and info probes, cache pre-pulls,
    /// the build, then tag/push pairs.
    pub fn build_and_push(
        &self,
        spec: &BuildSpec,
        builder: &BuilderHandle,
        dry_run: bool,
    ) -> Vec<CommandStep> {
        let mut steps = vec![self.version(), self.info()];
        steps.extend(spec.cache_from.iter().map(|image| self.pull(image)));
        steps.push(self.build(spec, builder));
        steps.extend(self.tag_and_push(spec, dry_run));
        steps
    }

    /// One tag step per tag, each followed by its push unless `dry_run`.
    pub fn tag_and_push(&self, spec: &BuildSpec, dry_run: bool) -> Vec<CommandStep> {
        let mut steps = Vec::with_capacity(spec.tags.len() * 2);
        for tag in spec.tags.iter() {
            let target = spec.image_ref(tag);
            steps.push(self.tag(&spec.temp_tag, &target));
            if !dry_run {
                steps.push(self.push(&target));
            }
        }
        steps
    }

    /// Removal of the temporary tag and every published tag, then a prune.
    pub fn cleanup(&self, spec: &BuildSpec) -> Vec<CommandStep> {
        let mut steps = vec![self.remove_image(&spec.temp_tag)];
        for tag in spec.tags.iter() {
            steps.push(self.remove_image(&spec.image_ref(tag)));
        }
        steps.push(self.prune());
        steps
    }
}

/// Labels synthesised from commit metadata, plus the configured label schema,
/// all under [`LABEL_PREFIX`].
pub fn auto_labels(spec: &BuildSpec, now: DateTime<Utc>) -> Vec<String> {
    let mut schema = vec![
        format!("created={}", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        format!("revision={}", spec.vcs.commit),
        format!("source={}", spec.vcs.remote),
        format!("url={}", spec.vcs.link),
    ];
    schema.extend(spec.label_schema.iter().cloned());

    schema
        .into_iter()
        .map(|label| format!("{}.{}", LABEL_PREFIX, label))
        .collect()
}

/// Adds lower- and upper-case proxy build args for each proxy variable
/// that is set and not yet present. Running it again is a no-op.
pub fn inject_proxy_build_args(args: &mut Vec<String>, proxy: &ProxyEnv) {
    for (key, value) in proxy.entries() {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        if has_build_arg(args, key) {
            continue;
        }
        args.push(format!("{}={}", key, value));
        args.push(format!("{}={}", key.to_uppercase(), value));
    }
}

fn has_build_arg(args: &[String], key: &str) -> bool {
    args.iter()
        .any(|arg| arg.to_ascii_lowercase().starts_with(key))
}
