use clap::Parser;
use drydock_config::Settings;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "drydock")]
#[command(about = "Build, tag and publish container images from CI", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file (.yml, .yaml or .json)
    #[arg(short, long, env = "DRYDOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging and daemon output
    #[arg(long, env = "DRYDOCK_DEBUG")]
    pub debug: bool,

    /// Repository to publish, e.g. acme/app
    #[arg(long, env = "DRYDOCK_REPO")]
    pub repo: Option<String>,

    #[arg(long, env = "DRYDOCK_DOCKERFILE")]
    pub dockerfile: Option<PathBuf>,

    /// Build context directory
    #[arg(long, env = "DRYDOCK_CONTEXT")]
    pub context: Option<PathBuf>,

    #[arg(long, env = "DRYDOCK_TARGET")]
    pub target: Option<String>,

    #[arg(long, env = "DRYDOCK_PLATFORM")]
    pub platform: Option<String>,

    /// Tags to publish
    #[arg(long, env = "DRYDOCK_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Derive tags from the commit ref
    #[arg(long, env = "DRYDOCK_AUTO_TAG")]
    pub auto_tag: bool,

    #[arg(long, env = "DRYDOCK_AUTO_TAG_SUFFIX")]
    pub auto_tag_suffix: Option<String>,

    /// Build argument (KEY=value), repeatable. Values may contain commas.
    #[arg(long = "build-arg")]
    pub build_args: Vec<String>,

    /// Several build arguments in one value, split on --build-args-delimiter
    #[arg(long = "build-args", env = "DRYDOCK_BUILD_ARGS")]
    pub build_args_list: Option<String>,

    #[arg(long, env = "DRYDOCK_BUILD_ARGS_DELIMITER", default_value = ";")]
    pub build_args_delimiter: String,

    /// Environment variables forwarded as build arguments
    #[arg(long, env = "DRYDOCK_ARGS_FROM_ENV", value_delimiter = ',')]
    pub args_from_env: Vec<String>,

    #[arg(long, env = "DRYDOCK_CACHE_FROM", value_delimiter = ',')]
    pub cache_from: Vec<String>,

    #[arg(long, env = "DRYDOCK_REGISTRY")]
    pub registry: Option<String>,

    #[arg(long, env = "DRYDOCK_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "DRYDOCK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "DRYDOCK_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "DRYDOCK_EMAIL")]
    pub email: Option<String>,

    /// Commit ref, e.g. refs/tags/v1.2.3
    #[arg(long, env = "DRYDOCK_COMMIT_REF")]
    pub commit_ref: Option<String>,

    #[arg(long, env = "DRYDOCK_COMMIT_SHA")]
    pub commit_sha: Option<String>,

    #[arg(long, env = "DRYDOCK_DEFAULT_BRANCH")]
    pub default_branch: Option<String>,

    /// Build without pushing
    #[arg(long, env = "DRYDOCK_DRY_RUN")]
    pub dry_run: bool,

    /// Push an existing local image instead of building
    #[arg(long, env = "DRYDOCK_PUSH_ONLY")]
    pub push_only: bool,

    /// Local image to publish in push-only mode
    #[arg(long, env = "DRYDOCK_SOURCE_IMAGE")]
    pub source_image: Option<String>,

    /// Image archive to load and push
    #[arg(long, env = "DRYDOCK_TARBALL")]
    pub tarball: Option<PathBuf>,

    /// Remove built images and prune after the push
    #[arg(long, env = "DRYDOCK_CLEANUP")]
    pub cleanup: bool,

    /// Use an already running docker daemon
    #[arg(long, env = "DRYDOCK_DAEMON_OFF")]
    pub daemon_off: bool,

    #[arg(long, env = "DRYDOCK_BUILDX_DRIVER")]
    pub buildx_driver: Option<String>,

    /// Registry flavour reported to post-push consumers (docker, ecr, gcr, gar, acr)
    #[arg(long, env = "DRYDOCK_REGISTRY_TYPE")]
    pub registry_type: Option<String>,
}

fn set<T>(field: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn set_opt<T>(field: &mut Option<T>, value: &Option<T>)
where
    T: Clone,
{
    if value.is_some() {
        *field = value.clone();
    }
}

/// Splits a delimited build-arg list, dropping blank entries.
fn split_build_args(raw: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return vec![raw.trim().to_string()];
    }
    raw.split(delimiter)
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(str::to_string)
        .collect()
}

impl Cli {
    fn build_args(&self) -> Vec<String> {
        let mut args = self.build_args.clone();
        if let Some(raw) = &self.build_args_list {
            args.extend(split_build_args(raw, &self.build_args_delimiter));
        }
        args
    }

    /// Applies flags on top of the loaded settings. Only flags that were
    /// given override.
    pub fn apply(&self, settings: &mut Settings) {
        set(&mut settings.build.repo, &self.repo);
        set(&mut settings.build.dockerfile, &self.dockerfile);
        set(&mut settings.build.context, &self.context);
        set_opt(&mut settings.build.target, &self.target);
        set_opt(&mut settings.build.platform, &self.platform);
        let build_args = self.build_args();
        if !build_args.is_empty() {
            settings.build.args = build_args;
        }
        if !self.args_from_env.is_empty() {
            settings.build.args_from_env = self.args_from_env.clone();
        }
        if !self.cache_from.is_empty() {
            settings.build.cache_from = self.cache_from.clone();
        }

        if !self.tags.is_empty() {
            settings.tags.tags = self.tags.clone();
        }
        settings.tags.auto |= self.auto_tag;
        set(&mut settings.tags.suffix, &self.auto_tag_suffix);

        set(&mut settings.login.registry, &self.registry);
        set_opt(&mut settings.login.username, &self.username);
        set_opt(&mut settings.login.password, &self.password);
        set_opt(&mut settings.login.access_token, &self.access_token);
        set_opt(&mut settings.login.email, &self.email);

        set(&mut settings.commit.git_ref, &self.commit_ref);
        set(&mut settings.commit.sha, &self.commit_sha);
        set(&mut settings.commit.default_branch, &self.default_branch);

        settings.dry_run |= self.dry_run;
        settings.push_only |= self.push_only;
        settings.cleanup |= self.cleanup;
        set_opt(&mut settings.source_image, &self.source_image);
        set_opt(&mut settings.tarball, &self.tarball);

        settings.daemon.disabled |= self.daemon_off;
        settings.daemon.debug |= self.debug;
        set(&mut settings.buildx.driver, &self.buildx_driver);
        set_opt(&mut settings.registry_type, &self.registry_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "drydock",
            "--repo",
            "acme/app",
            "--tags",
            "1.0,latest",
            "--push-only",
            "--commit-ref",
            "refs/tags/v1.0.0",
        ]);
        let mut settings = Settings::default();
        settings.build.repo = "other/app".into();
        settings.cleanup = true;
        cli.apply(&mut settings);

        assert_eq!(settings.build.repo, "acme/app");
        assert_eq!(settings.tags.tags, vec!["1.0", "latest"]);
        assert!(settings.push_only);
        assert!(settings.cleanup);
        assert_eq!(settings.commit.git_ref, "refs/tags/v1.0.0");
    }

    #[test]
    fn test_build_arg_keeps_commas() {
        let cli = Cli::parse_from([
            "drydock",
            "--build-arg",
            "NO_PROXY=a,b",
            "--build-arg",
            "LIST=x,y",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.build.args, vec!["NO_PROXY=a,b", "LIST=x,y"]);
    }

    #[test]
    fn test_build_args_list_uses_delimiter() {
        let cli = Cli::parse_from([
            "drydock",
            "--build-arg",
            "FIRST=1",
            "--build-args",
            "NO_PROXY=a,b; VERSION=2;",
        ]);
        assert_eq!(cli.build_args(), vec!["FIRST=1", "NO_PROXY=a,b", "VERSION=2"]);

        let cli = Cli::parse_from([
            "drydock",
            "--build-args",
            "A=1|B=x,y",
            "--build-args-delimiter",
            "|",
        ]);
        assert_eq!(cli.build_args(), vec!["A=1", "B=x,y"]);
    }

    #[test]
    fn test_split_build_args_without_delimiter() {
        assert_eq!(split_build_args(" A=1;2 ", ""), vec!["A=1;2"]);
    }

    #[test]
    fn test_absent_flags_keep_settings() {
        let cli = Cli::parse_from(["drydock"]);
        let mut settings = Settings::default();
        settings.build.cache_from = vec!["acme/app:cache".into()];
        settings.login.username = Some("bob".into());
        cli.apply(&mut settings);

        assert_eq!(settings.build.cache_from, vec!["acme/app:cache"]);
        assert_eq!(settings.login.username.as_deref(), Some("bob"));
        assert_eq!(settings.tags.tags, vec!["latest"]);
    }
}
