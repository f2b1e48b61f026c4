//! Settings document
//!
//! Deserialized from YAML or JSON, overridden by CLI flags, then turned into
//! the typed [`PipelineConfig`] exactly once.

use crate::docker_config::{DEFAULT_REGISTRY, RegistryCredentials, build_auth_config};
use crate::env::AmbientEnv;
use crate::error::{ConfigError, Result};
use crate::tags_file::read_tags_file;
use drydock_build::{
    BaseImageCredentials, BuildSpec, BuildxConfig, DaemonConfig, LoginCredentials, ModeFlags,
    PipelineConfig, RegistryType, TagSet, VcsMetadata, parse_secrets, resolve_tags,
    use_default_tag,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Seccomp profile handed to the daemon when present and none is configured.
pub const DEFAULT_SECCOMP_PROFILE: &str = "/etc/docker/default.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub repo: String,
    pub args: Vec<String>,
    /// Environment variable names forwarded as build args
    pub args_from_env: Vec<String>,
    pub secret: Option<String>,
    pub secrets_from_env: Vec<String>,
    pub secrets_from_file: Vec<String>,
    pub ssh_agent_key: Option<String>,
    pub add_host: Vec<String>,
    pub cache_from: Vec<String>,
    pub labels: Vec<String>,
    pub label_schema: Vec<String>,
    pub auto_label: bool,
    pub squash: bool,
    pub compress: bool,
    pub pull: bool,
    pub no_cache: bool,
    pub quiet: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            dockerfile: PathBuf::from("Dockerfile"),
            context: PathBuf::from("."),
            target: None,
            platform: None,
            repo: String::new(),
            args: Vec::new(),
            args_from_env: Vec::new(),
            secret: None,
            secrets_from_env: Vec::new(),
            secrets_from_file: Vec::new(),
            ssh_agent_key: None,
            add_host: Vec::new(),
            cache_from: Vec::new(),
            labels: Vec::new(),
            label_schema: Vec::new(),
            auto_label: true,
            squash: false,
            compress: false,
            pull: true,
            no_cache: false,
            quiet: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// One mirror or a comma-separated list
    pub mirror: Option<String>,
    pub insecure: bool,
    pub storage_driver: Option<String>,
    pub storage_path: PathBuf,
    pub disabled: bool,
    pub debug: bool,
    pub bip: Option<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub mtu: Option<String>,
    pub ipv6: bool,
    pub experimental: bool,
    pub seccomp_profile: Option<PathBuf>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        let daemon = DaemonConfig::default();
        Self {
            mirror: None,
            insecure: false,
            storage_driver: None,
            storage_path: daemon.storage_path,
            disabled: false,
            debug: false,
            bip: None,
            dns: Vec::new(),
            dns_search: Vec::new(),
            mtu: None,
            ipv6: false,
            experimental: false,
            seccomp_profile: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSettings {
    pub registry: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub email: Option<String>,
    /// Raw docker `config.json` document
    pub config: Option<String>,
    /// Generate `config.json` from the credentials when no raw document is set
    pub write_config: bool,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            username: None,
            password: None,
            access_token: None,
            email: None,
            config: None,
            write_config: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseImageSettings {
    pub registry: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildxSettings {
    pub driver: String,
    pub config: Option<PathBuf>,
    pub driver_opts: Vec<String>,
}

impl Default for BuildxSettings {
    fn default() -> Self {
        let buildx = BuildxConfig::default();
        Self {
            driver: buildx.driver,
            config: None,
            driver_opts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagSettings {
    pub tags: Vec<String>,
    /// Derive tags from the commit ref
    pub auto: bool,
    pub suffix: String,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            tags: vec!["latest".to_string()],
            auto: false,
            suffix: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSettings {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub default_branch: String,
    pub remote: String,
    pub link: String,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            git_ref: "refs/heads/main".to_string(),
            sha: "00000000".to_string(),
            default_branch: "main".to_string(),
            remote: String::new(),
            link: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub build: BuildSettings,
    pub daemon: DaemonSettings,
    pub login: LoginSettings,
    pub base_image: BaseImageSettings,
    pub buildx: BuildxSettings,
    pub tags: TagSettings,
    pub commit: CommitSettings,
    pub dry_run: bool,
    pub push_only: bool,
    pub source_image: Option<String>,
    pub tarball: Option<PathBuf>,
    pub cleanup: bool,
    pub registry_type: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// The configured profile, else `fallback` when that file exists.
fn seccomp_profile(configured: &Option<PathBuf>, fallback: &Path) -> Option<PathBuf> {
    configured
        .clone()
        .or_else(|| fallback.exists().then(|| fallback.to_path_buf()))
}

impl Settings {
    /// Loads a settings file, format chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let settings = match ext.as_deref() {
            Some("yml") | Some("yaml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// False when automatic tags are enabled but the ref is neither a tag
    /// nor the default branch; such runs are skipped.
    pub fn auto_tag_gate(&self) -> bool {
        !self.tags.auto || use_default_tag(&self.commit.git_ref, &self.commit.default_branch)
    }

    /// Tags to publish: `.tags.yml` in the context wins, then automatic
    /// tags, then the configured list.
    pub fn resolve_tags(&self) -> Result<TagSet> {
        if let Some(tags) = read_tags_file(&self.build.context)? {
            return Ok(TagSet::new(tags));
        }
        if self.tags.auto {
            return Ok(resolve_tags(&self.commit.git_ref, &self.tags.suffix));
        }
        Ok(TagSet::new(self.tags.tags.iter().cloned()))
    }

    fn mirrors(&self) -> Vec<String> {
        self.daemon
            .mirror
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn auth_config(&self) -> Result<Option<String>> {
        if let Some(raw) = non_empty(&self.login.config) {
            return Ok(Some(raw));
        }
        if !self.login.write_config {
            return Ok(None);
        }

        let push = RegistryCredentials {
            registry: self.login.registry.clone(),
            username: self.login.username.clone().unwrap_or_default(),
            password: self.login.password.clone().unwrap_or_default(),
        };
        let base = non_empty(&self.base_image.registry).map(|registry| RegistryCredentials {
            registry,
            username: self.base_image.username.clone().unwrap_or_default(),
            password: self.base_image.password.clone().unwrap_or_default(),
        });
        build_auth_config(Some(push), base).map(Some)
    }

    fn build_spec(&self, env: &AmbientEnv, tags: TagSet) -> BuildSpec {
        let build = &self.build;
        let mut args = build.args.clone();
        args.extend(env.build_args_from(&build.args_from_env, &build.args));

        BuildSpec {
            dockerfile: build.dockerfile.clone(),
            context: build.context.clone(),
            target: non_empty(&build.target),
            platform: non_empty(&build.platform),
            repo: build.repo.clone(),
            temp_tag: BuildSpec::generate_temp_tag(),
            tags,
            args,
            secret: non_empty(&build.secret),
            secrets: parse_secrets(&build.secrets_from_env, &build.secrets_from_file),
            ssh_agent_key: non_empty(&build.ssh_agent_key),
            ssh_key_path: None,
            add_hosts: build.add_host.clone(),
            cache_from: build.cache_from.clone(),
            labels: build.labels.clone(),
            label_schema: build.label_schema.clone(),
            auto_label: build.auto_label,
            vcs: VcsMetadata {
                commit: self.commit.sha.clone(),
                remote: self.commit.remote.clone(),
                link: self.commit.link.clone(),
            },
            squash: build.squash,
            compress: build.compress,
            pull: build.pull,
            no_cache: build.no_cache,
            quiet: build.quiet,
        }
    }

    /// Validates the settings and produces the pipeline's typed input.
    pub fn into_pipeline_config(self, env: &AmbientEnv) -> Result<PipelineConfig> {
        if self.build.repo.trim().is_empty() {
            return Err(ConfigError::Invalid("build.repo must be set".to_string()));
        }

        let tags = self.resolve_tags()?;
        let auth_config = self.auth_config()?;
        let build = self.build_spec(env, tags);
        let mirrors = self.mirrors();

        // The login registry is also the one marked insecure
        let daemon = DaemonConfig {
            registry: Some(self.login.registry.clone()).filter(|r| !r.trim().is_empty()),
            mirrors,
            insecure: self.daemon.insecure,
            storage_driver: non_empty(&self.daemon.storage_driver),
            storage_path: self.daemon.storage_path.clone(),
            disabled: self.daemon.disabled,
            debug: self.daemon.debug,
            bip: non_empty(&self.daemon.bip),
            dns: self.daemon.dns.clone(),
            dns_search: self.daemon.dns_search.clone(),
            mtu: non_empty(&self.daemon.mtu),
            ipv6: self.daemon.ipv6,
            experimental: self.daemon.experimental,
            seccomp_profile: seccomp_profile(
                &self.daemon.seccomp_profile,
                Path::new(DEFAULT_SECCOMP_PROFILE),
            ),
        };

        let login = LoginCredentials {
            registry: self.login.registry.clone(),
            username: non_empty(&self.login.username),
            password: non_empty(&self.login.password),
            access_token: non_empty(&self.login.access_token),
            email: non_empty(&self.login.email),
            auth_config,
        };

        let base_image = BaseImageCredentials {
            registry: non_empty(&self.base_image.registry),
            username: non_empty(&self.base_image.username),
            password: non_empty(&self.base_image.password),
        };

        let buildx = BuildxConfig {
            driver: self.buildx.driver.clone(),
            config_file: self.buildx.config.clone(),
            driver_opts: self.buildx.driver_opts.clone(),
        };

        let mode = ModeFlags {
            dry_run: self.dry_run,
            push_only: self.push_only,
            source_image: non_empty(&self.source_image),
            tarball: self.tarball.clone(),
        };

        let registry_type: RegistryType = self
            .registry_type
            .as_deref()
            .unwrap_or_default()
            .parse()
            .unwrap_or_default();

        Ok(PipelineConfig {
            build,
            daemon,
            login,
            base_image,
            buildx,
            mode,
            cleanup: self.cleanup,
            proxy: env.proxy(),
            registry_type,
            ..PipelineConfig::default()
        })
    }
}

/// Locates the settings file.
///
/// Search order:
/// 1. `DRYDOCK_CONFIG`
/// 2. current directory: `drydock.yml`, `drydock.yaml`, `drydock.json`, `.drydock.yml`
/// 3. `~/.config/drydock/drydock.yml`
pub fn find_settings_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("DRYDOCK_CONFIG") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["drydock.yml", "drydock.yaml", "drydock.json", ".drydock.yml"];
    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("drydock").join("drydock.yml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::SettingsFileNotFound)
}
