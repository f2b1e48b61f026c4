//! Typed inputs of a pipeline run
//!
//! Everything here is produced once by the configuration layer and then only
//! read by step construction.

use crate::tags::TagSet;
use std::fmt;
use std::path::PathBuf;

/// Build secret, validated once when the configuration is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secret {
    /// `id=<key>,env=<var>`
    EnvSourced { key: String, env_var: String },
    /// `id=<key>,src=<path>`
    FileSourced { key: String, path: PathBuf },
}

/// Malformed `key=value` secret spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSecret(pub String);

impl fmt::Display for InvalidSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid secret", self.0)
    }
}

impl std::error::Error for InvalidSecret {}

impl Secret {
    /// Parses `key=ENV_VAR`.
    pub fn from_env_spec(spec: &str) -> Result<Self, InvalidSecret> {
        let (key, value) = split_secret(spec)?;
        Ok(Secret::EnvSourced {
            key: key.to_string(),
            env_var: value.to_string(),
        })
    }

    /// Parses `key=/path/to/file`.
    pub fn from_file_spec(spec: &str) -> Result<Self, InvalidSecret> {
        let (key, value) = split_secret(spec)?;
        Ok(Secret::FileSourced {
            key: key.to_string(),
            path: PathBuf::from(value),
        })
    }

    /// Value for the build tool's `--secret` flag.
    pub fn to_arg(&self) -> String {
        match self {
            Secret::EnvSourced { key, env_var } => format!("id={},env={}", key, env_var),
            Secret::FileSourced { key, path } => format!("id={},src={}", key, path.display()),
        }
    }
}

/// Parses env-sourced then file-sourced secret specs. Malformed entries are
/// dropped with a warning and never abort the build.
pub fn parse_secrets(env_specs: &[String], file_specs: &[String]) -> Vec<Secret> {
    let env = env_specs.iter().map(|spec| Secret::from_env_spec(spec));
    let file = file_specs.iter().map(|spec| Secret::from_file_spec(spec));
    env.chain(file)
        .filter_map(|parsed| match parsed {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::warn!("Dropping secret: {}", e);
                None
            }
        })
        .collect()
}

fn split_secret(spec: &str) -> Result<(&str, &str), InvalidSecret> {
    match spec.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((key, value)),
        _ => Err(InvalidSecret(spec.to_string())),
    }
}

/// Commit facts used for auto-generated labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsMetadata {
    /// Commit name (usually the SHA)
    pub commit: String,
    /// Remote URL of the repository
    pub remote: String,
    /// Browser link to the repository
    pub link: String,
}

/// Parameters of a single image build.
#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub target: Option<String>,
    pub platform: Option<String>,
    /// Repository that tags are published to, e.g. `acme/app`
    pub repo: String,
    /// Unique per-run tag given to the freshly built image
    pub temp_tag: String,
    pub tags: TagSet,
    /// `KEY=value` build arguments
    pub args: Vec<String>,
    /// Raw `--secret` value passed through as-is
    pub secret: Option<String>,
    pub secrets: Vec<Secret>,
    /// Private key material for the SSH agent forward
    pub ssh_agent_key: Option<String>,
    /// `default=<path>` once the key has been written to disk
    pub ssh_key_path: Option<String>,
    pub add_hosts: Vec<String>,
    pub cache_from: Vec<String>,
    /// Explicit `key=value` labels
    pub labels: Vec<String>,
    /// Extra labels placed under the auto-label namespace
    pub label_schema: Vec<String>,
    pub auto_label: bool,
    pub vcs: VcsMetadata,
    pub squash: bool,
    pub compress: bool,
    pub pull: bool,
    pub no_cache: bool,
    pub quiet: bool,
}

impl BuildSpec {
    /// Secrets or an SSH key require BuildKit.
    pub fn needs_buildkit(&self) -> bool {
        self.secret.is_some() || !self.secrets.is_empty() || self.ssh_agent_key.is_some()
    }

    /// `repo:tag`
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.repo, tag)
    }

    /// Temporary build tag derived from a fresh UUID.
    pub fn generate_temp_tag() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Settings for the local build daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Registry host the insecure flag applies to
    pub registry: Option<String>,
    pub mirrors: Vec<String>,
    pub insecure: bool,
    pub storage_driver: Option<String>,
    pub storage_path: PathBuf,
    /// Daemon is managed outside of this step
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

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            registry: None,
            mirrors: Vec::new(),
            insecure: false,
            storage_driver: None,
            storage_path: PathBuf::from("/var/lib/docker"),
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

impl DaemonConfig {
    /// Registry host that should be marked insecure, if any.
    pub fn insecure_registry(&self) -> Option<&str> {
        if self.insecure {
            self.registry.as_deref().filter(|r| !r.is_empty())
        } else {
            None
        }
    }
}

/// Credentials for the registry that images are pushed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginCredentials {
    pub registry: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub email: Option<String>,
    /// Pre-built docker `config.json` document
    pub auth_config: Option<String>,
}

/// Which login, if any, a credential set drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    Password,
    AccessToken,
    Guest,
}

impl LoginCredentials {
    pub fn kind(&self) -> LoginKind {
        if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            LoginKind::Password
        } else if self.access_token.as_deref().is_some_and(|t| !t.is_empty()) {
            LoginKind::AccessToken
        } else {
            LoginKind::Guest
        }
    }

    pub fn has_auth_config(&self) -> bool {
        self.auth_config.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Optional credentials for the registry base images are pulled from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseImageCredentials {
    pub registry: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// How complete a base-image credential set is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImageLogin {
    /// Nothing supplied; the feature is not used
    Unused,
    /// Username or password missing
    Partial,
    Complete {
        registry: String,
        username: String,
        password: String,
    },
}

impl BaseImageCredentials {
    pub fn classify(&self) -> BaseImageLogin {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        match (
            non_empty(&self.registry),
            non_empty(&self.username),
            non_empty(&self.password),
        ) {
            (_, None, None) => BaseImageLogin::Unused,
            (Some(registry), Some(username), Some(password)) => BaseImageLogin::Complete {
                registry,
                username,
                password,
            },
            _ => BaseImageLogin::Partial,
        }
    }
}

/// Multi-platform builder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildxConfig {
    pub driver: String,
    pub config_file: Option<PathBuf>,
    pub driver_opts: Vec<String>,
}

pub const LOCAL_BUILDX_DRIVER: &str = "docker";

impl Default for BuildxConfig {
    fn default() -> Self {
        Self {
            driver: LOCAL_BUILDX_DRIVER.to_string(),
            config_file: None,
            driver_opts: Vec::new(),
        }
    }
}

impl BuildxConfig {
    /// The local driver never needs an ephemeral builder.
    pub fn is_local(&self) -> bool {
        self.driver.is_empty() || self.driver == LOCAL_BUILDX_DRIVER
    }
}

/// Proxy settings captured from the environment at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyEnv {
    /// Looks up each proxy variable, lower-case spelling first.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(&key.to_uppercase()).filter(|v| !v.is_empty()))
        };
        Self {
            http_proxy: get("http_proxy"),
            https_proxy: get("https_proxy"),
            no_proxy: get("no_proxy"),
        }
    }

    pub fn entries(&self) -> [(&'static str, Option<&str>); 3] {
        [
            ("http_proxy", self.http_proxy.as_deref()),
            ("https_proxy", self.https_proxy.as_deref()),
            ("no_proxy", self.no_proxy.as_deref()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_env_spec() {
        let secret = Secret::from_env_spec("npm_token=NPM_TOKEN").unwrap();
        assert_eq!(secret.to_arg(), "id=npm_token,env=NPM_TOKEN");
    }

    #[test]
    fn test_secret_file_spec() {
        let secret = Secret::from_file_spec("netrc=/root/.netrc").unwrap();
        assert_eq!(secret.to_arg(), "id=netrc,src=/root/.netrc");
    }

    #[test]
    fn test_secret_value_may_contain_equals() {
        let secret = Secret::from_env_spec("key=A=B").unwrap();
        assert_eq!(secret.to_arg(), "id=key,env=A=B");
    }

    #[test]
    fn test_secret_malformed() {
        for spec in ["key=", "=value", "", "novalue"] {
            assert!(Secret::from_env_spec(spec).is_err(), "{}", spec);
            assert!(Secret::from_file_spec(spec).is_err(), "{}", spec);
        }
        assert_eq!(
            Secret::from_env_spec("key=").unwrap_err().to_string(),
            "key= is not a valid secret"
        );
    }

    #[test]
    fn test_parse_secrets_drops_malformed() {
        let env = vec!["npm=NPM_TOKEN".to_string(), "key=".to_string()];
        let file = vec!["=value".to_string(), "".to_string(), "netrc=/root/.netrc".to_string()];
        let args: Vec<String> = parse_secrets(&env, &file)
            .iter()
            .map(Secret::to_arg)
            .collect();
        assert_eq!(args, vec!["id=npm,env=NPM_TOKEN", "id=netrc,src=/root/.netrc"]);
    }

    #[test]
    fn test_login_kind() {
        let mut login = LoginCredentials::default();
        assert_eq!(login.kind(), LoginKind::Guest);

        login.access_token = Some("token".into());
        assert_eq!(login.kind(), LoginKind::AccessToken);

        login.password = Some("secret".into());
        assert_eq!(login.kind(), LoginKind::Password);
    }

    #[test]
    fn test_base_image_classify() {
        let creds = BaseImageCredentials::default();
        assert_eq!(creds.classify(), BaseImageLogin::Unused);

        let creds = BaseImageCredentials {
            registry: Some("docker.io".into()),
            ..Default::default()
        };
        assert_eq!(creds.classify(), BaseImageLogin::Unused);

        let creds = BaseImageCredentials {
            registry: Some("docker.io".into()),
            username: Some("bob".into()),
            password: None,
        };
        assert_eq!(creds.classify(), BaseImageLogin::Partial);

        let creds = BaseImageCredentials {
            registry: Some("docker.io".into()),
            username: Some("bob".into()),
            password: Some("pw".into()),
        };
        assert!(matches!(creds.classify(), BaseImageLogin::Complete { .. }));
    }

    #[test]
    fn test_insecure_registry_requires_host() {
        let mut daemon = DaemonConfig {
            insecure: true,
            ..Default::default()
        };
        assert_eq!(daemon.insecure_registry(), None);

        daemon.registry = Some("registry.local:5000".into());
        assert_eq!(daemon.insecure_registry(), Some("registry.local:5000"));

        daemon.insecure = false;
        assert_eq!(daemon.insecure_registry(), None);
    }

    #[test]
    fn test_proxy_env_prefers_lower_case() {
        let env = ProxyEnv::from_lookup(|key| match key {
            "http_proxy" => Some("http://lower".into()),
            "HTTP_PROXY" => Some("http://upper".into()),
            "HTTPS_PROXY" => Some("http://secure".into()),
            _ => None,
        });
        assert_eq!(env.http_proxy.as_deref(), Some("http://lower"));
        assert_eq!(env.https_proxy.as_deref(), Some("http://secure"));
        assert_eq!(env.no_proxy, None);
    }

    #[test]
    fn test_temp_tag_is_unique() {
        let a = BuildSpec::generate_temp_tag();
        let b = BuildSpec::generate_temp_tag();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
