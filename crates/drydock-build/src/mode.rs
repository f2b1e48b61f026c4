//! Execution modes
//!
//! Build-and-push, push-only of an existing local image, and push of a
//! saved image archive. Exactly one runs per pipeline.

use crate::builder::with_builder;
use crate::commands::CommandBuilder;
use crate::error::{PipelineError, Result};
use crate::executor::{ExecutionReport, Executor};
use crate::model::{BuildSpec, BuildxConfig, LoginCredentials, LoginKind};
use crate::reference::{parse_loaded_image, parse_repo_digest, split_image_tag};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    BuildAndPush,
    PushOnly { source_image: Option<String> },
    LocalTarballPush { archive: PathBuf },
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::BuildAndPush => "build-and-push",
            ExecutionMode::PushOnly { .. } => "push-only",
            ExecutionMode::LocalTarballPush { .. } => "tarball-push",
        }
    }

    pub fn is_push_only(&self) -> bool {
        matches!(self, ExecutionMode::PushOnly { .. })
    }

    /// Checks that need no subprocess: archive presence and credentials for
    /// tarball pushes.
    pub fn preflight(&self, login: &LoginCredentials) -> Result<()> {
        if let ExecutionMode::LocalTarballPush { archive } = self {
            if login.kind() == LoginKind::Guest && !login.has_auth_config() {
                return Err(PipelineError::MissingCredentials(
                    "pushing an image archive requires registry credentials".to_string(),
                ));
            }
            if !archive.exists() {
                return Err(PipelineError::TarballNotFound(archive.clone()));
            }
        }
        Ok(())
    }
}

/// Raw mode inputs from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub dry_run: bool,
    pub push_only: bool,
    pub source_image: Option<String>,
    pub tarball: Option<PathBuf>,
}

impl ModeFlags {
    /// Picks the mode, rejecting contradictory combinations.
    pub fn select(&self) -> Result<ExecutionMode> {
        if self.push_only && self.dry_run {
            return Err(PipelineError::ConfigConflict(
                "push-only and dry-run cannot be used together".to_string(),
            ));
        }

        let tarball = self.tarball.as_ref().filter(|p| !p.as_os_str().is_empty());
        if let Some(archive) = tarball {
            if self.push_only {
                return Err(PipelineError::ConfigConflict(
                    "tarball push and push-only cannot be used together".to_string(),
                ));
            }
            if self.dry_run {
                return Err(PipelineError::ConfigConflict(
                    "tarball push and dry-run cannot be used together".to_string(),
                ));
            }
            return Ok(ExecutionMode::LocalTarballPush {
                archive: archive.clone(),
            });
        }

        if self.push_only {
            return Ok(ExecutionMode::PushOnly {
                source_image: self.source_image.clone().filter(|s| !s.is_empty()),
            });
        }
        Ok(ExecutionMode::BuildAndPush)
    }
}

/// What a mode published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub pushed_tags: Vec<String>,
    pub digest: Option<String>,
}

/// Best-effort digest lookup. Failures are logged and yield `None`.
pub async fn resolve_digest(
    executor: &Executor,
    commands: &CommandBuilder,
    image: &str,
) -> Option<String> {
    match executor.run_captured(&commands.inspect_digest(image)).await {
        Ok(output) if output.success => {
            let digest = parse_repo_digest(&output.stdout);
            if digest.is_none() {
                tracing::warn!("Could not fetch the digest of {}", image);
            }
            digest
        }
        Ok(output) => {
            tracing::warn!(
                "Could not fetch the digest of {}: {}",
                image,
                output.status_text()
            );
            None
        }
        Err(e) => {
            tracing::warn!("Could not fetch the digest of {}: {}", image, e);
            None
        }
    }
}

/// Builds the image and publishes every tag, bracketed by the builder
/// lifecycle.
pub async fn build_and_push(
    executor: &Executor,
    commands: &CommandBuilder,
    spec: &BuildSpec,
    buildx: &BuildxConfig,
    dry_run: bool,
    report: &mut ExecutionReport,
) -> Result<PushOutcome> {
    with_builder(executor, commands, buildx, |handle| async move {
        let steps = commands.build_and_push(spec, &handle, dry_run);
        executor.run_steps(&steps, report).await
    })
    .await?;

    if dry_run {
        return Ok(PushOutcome::default());
    }
    Ok(PushOutcome {
        pushed_tags: spec.tags.to_vec(),
        digest: resolve_digest(executor, commands, &spec.temp_tag).await,
    })
}

/// Candidate source references, in preference order.
fn source_candidates(spec: &BuildSpec, source_image: Option<&str>) -> Vec<String> {
    match source_image {
        Some(image) => {
            let (name, tag) = split_image_tag(image);
            tracing::info!("Using source image: {} with tag: {}", name, tag);
            vec![format!("{}:{}", name, tag)]
        }
        None => {
            tracing::info!("source_image not provided, using repo and tag value");
            spec.tags.iter().map(|tag| spec.image_ref(tag)).collect()
        }
    }
}

/// Publishes an image that already exists locally.
pub async fn push_only(
    executor: &Executor,
    commands: &CommandBuilder,
    spec: &BuildSpec,
    source_image: Option<&str>,
) -> Result<PushOutcome> {
    let candidates = source_candidates(spec, source_image);

    let mut source = None;
    for candidate in &candidates {
        if executor.probe(&commands.image_exists(candidate)).await {
            source = Some(candidate.as_str());
            break;
        }
        tracing::warn!("Source image {} not found", candidate);
    }
    let source = source.ok_or_else(|| {
        PipelineError::SourceImageNotFound(if candidates.is_empty() {
            spec.repo.clone()
        } else {
            candidates.join(", ")
        })
    })?;

    for tag in spec.tags.iter() {
        let target = spec.image_ref(tag);
        if target == source {
            tracing::info!("Source and target image names are identical: {}", source);
            continue;
        }
        tracing::info!("Tagging {} as {}", source, target);
        executor.run_step(&commands.tag(source, &target)).await?;
    }

    let mut outcome = PushOutcome::default();
    for tag in spec.tags.iter() {
        let target = spec.image_ref(tag);
        if !executor.probe(&commands.image_exists(&target)).await {
            return Err(PipelineError::SourceImageNotFound(target));
        }
        executor.run_step(&commands.push(&target)).await?;
        outcome.pushed_tags.push(tag.to_string());

        if outcome.digest.is_none() {
            outcome.digest = resolve_digest(executor, commands, &target).await;
        }
    }
    Ok(outcome)
}

/// Loads a saved archive and pushes it under the primary tag.
pub async fn tarball_push(
    executor: &Executor,
    commands: &CommandBuilder,
    spec: &BuildSpec,
    archive: &Path,
) -> Result<PushOutcome> {
    if !archive.exists() {
        return Err(PipelineError::TarballNotFound(archive.to_path_buf()));
    }
    let tag = spec.tags.primary().ok_or_else(|| {
        PipelineError::ConfigConflict("tarball push needs at least one target tag".to_string())
    })?;

    let load = commands.load(&archive.display().to_string());
    let output = executor.run_captured(&load).await?;
    if !output.success {
        return Err(PipelineError::StepFailed {
            command: load.command_line(),
            status: output.status_text(),
        });
    }
    let combined = output.combined();
    let loaded = parse_loaded_image(&combined)
        .ok_or_else(|| PipelineError::LoadedImageUnparseable(combined.trim().to_string()))?;
    tracing::info!("Loaded image {}", loaded);

    let target = spec.image_ref(tag);
    if loaded != target {
        executor.run_step(&commands.tag(&loaded, &target)).await?;
    }
    executor.run_step(&commands.push(&target)).await?;

    Ok(PushOutcome {
        pushed_tags: vec![tag.to_string()],
        digest: resolve_digest(executor, commands, &target).await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StepOutput;
    use crate::step::StepKind;
    use crate::tags::TagSet;
    use crate::testing::FakeRunner;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn spec(tags: &[&str]) -> BuildSpec {
        BuildSpec {
            dockerfile: PathBuf::from("Dockerfile"),
            context: PathBuf::from("."),
            repo: "acme/app".into(),
            temp_tag: "tmp123".into(),
            tags: TagSet::new(tags.iter().copied()),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<FakeRunner>, Executor, CommandBuilder) {
        let runner = Arc::new(FakeRunner::new());
        let executor = Executor::new(runner.clone());
        (runner, executor, CommandBuilder::default())
    }

    #[test]
    fn test_select_modes() {
        assert_eq!(ModeFlags::default().select().unwrap(), ExecutionMode::BuildAndPush);

        let flags = ModeFlags {
            push_only: true,
            source_image: Some("".into()),
            ..Default::default()
        };
        assert_eq!(
            flags.select().unwrap(),
            ExecutionMode::PushOnly { source_image: None }
        );

        let flags = ModeFlags {
            tarball: Some(PathBuf::from("/tmp/app.tar")),
            ..Default::default()
        };
        assert_eq!(
            flags.select().unwrap(),
            ExecutionMode::LocalTarballPush {
                archive: PathBuf::from("/tmp/app.tar")
            }
        );
    }

    #[test]
    fn test_select_rejects_conflicts() {
        let conflicts = [
            ModeFlags {
                push_only: true,
                dry_run: true,
                ..Default::default()
            },
            ModeFlags {
                push_only: true,
                tarball: Some(PathBuf::from("a.tar")),
                ..Default::default()
            },
            ModeFlags {
                dry_run: true,
                tarball: Some(PathBuf::from("a.tar")),
                ..Default::default()
            },
        ];
        for flags in conflicts {
            assert!(
                matches!(flags.select(), Err(PipelineError::ConfigConflict(_))),
                "{:?}",
                flags
            );
        }
    }

    #[test]
    fn test_tarball_preflight() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar");
        let mode = ExecutionMode::LocalTarballPush {
            archive: archive.clone(),
        };
        let login = LoginCredentials {
            registry: "registry.example.com".into(),
            username: Some("bob".into()),
            password: Some("pw".into()),
            ..Default::default()
        };

        assert!(matches!(
            mode.preflight(&LoginCredentials::default()),
            Err(PipelineError::MissingCredentials(_))
        ));
        assert!(matches!(
            mode.preflight(&login),
            Err(PipelineError::TarballNotFound(_))
        ));

        std::fs::write(&archive, b"tar").unwrap();
        assert!(mode.preflight(&login).is_ok());
    }

    #[tokio::test]
    async fn test_build_and_push_scenario() {
        let (runner, executor, commands) = setup();
        runner.respond(
            &["inspect", "--format={{index .RepoDigests 0}}"],
            StepOutput::ok("'acme/app@sha256:feed'\n"),
        );
        let mut report = ExecutionReport::default();

        let outcome = build_and_push(
            &executor,
            &commands,
            &spec(&["2", "2.3", "2.3.4"]),
            &BuildxConfig::default(),
            false,
            &mut report,
        )
        .await
        .unwrap();

        assert_eq!(outcome.pushed_tags, vec!["2", "2.3", "2.3.4"]);
        assert_eq!(outcome.digest.as_deref(), Some("sha256:feed"));
        assert_eq!(runner.count(StepKind::Build), 1);
        assert_eq!(runner.count(StepKind::Pull), 0);
        assert_eq!(runner.count(StepKind::Tag), 3);
        assert_eq!(runner.count(StepKind::Push), 3);
    }

    #[tokio::test]
    async fn test_dry_run_tags_without_pushing() {
        let (runner, executor, commands) = setup();
        let mut report = ExecutionReport::default();

        let outcome = build_and_push(
            &executor,
            &commands,
            &spec(&["1", "1.0", "1.0.0"]),
            &BuildxConfig::default(),
            true,
            &mut report,
        )
        .await
        .unwrap();

        assert!(outcome.pushed_tags.is_empty());
        assert_eq!(runner.count(StepKind::Tag), 3);
        assert_eq!(runner.count(StepKind::Push), 0);
        assert_eq!(runner.count(StepKind::Inspect), 0);
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_tagging() {
        let (runner, executor, commands) = setup();
        runner.fail_on(&["buildx", "build"]);
        let buildx = BuildxConfig {
            driver: "docker-container".into(),
            ..Default::default()
        };
        let mut report = ExecutionReport::default();

        let err = build_and_push(
            &executor,
            &commands,
            &spec(&["1"]),
            &buildx,
            false,
            &mut report,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::StepFailed { .. }));
        assert_eq!(runner.count(StepKind::Tag), 0);
        assert_eq!(runner.count(StepKind::BuilderRemove), 1);
    }

    #[tokio::test]
    async fn test_push_only_source_equals_target() {
        let (runner, executor, commands) = setup();

        let outcome = push_only(&executor, &commands, &spec(&["v9"]), None)
            .await
            .unwrap();

        assert_eq!(runner.count(StepKind::Tag), 0);
        assert_eq!(runner.count(StepKind::Push), 1);
        assert_eq!(outcome.pushed_tags, vec!["v9"]);
    }

    #[tokio::test]
    async fn test_push_only_explicit_source() {
        let (runner, executor, commands) = setup();

        push_only(
            &executor,
            &commands,
            &spec(&["1", "1.2"]),
            Some("localhost:5000/built"),
        )
        .await
        .unwrap();

        let tags: Vec<Vec<String>> = runner
            .steps()
            .iter()
            .filter(|s| s.kind() == StepKind::Tag)
            .map(|s| s.args().to_vec())
            .collect();
        assert_eq!(
            tags,
            vec![
                vec!["tag", "localhost:5000/built:latest", "acme/app:1"],
                vec!["tag", "localhost:5000/built:latest", "acme/app:1.2"],
            ]
        );
        assert_eq!(runner.count(StepKind::Push), 2);
    }

    #[tokio::test]
    async fn test_push_only_falls_back_to_next_tag() {
        let (runner, executor, commands) = setup();
        runner.respond_times(
            &["image", "inspect", "acme/app:1"],
            StepOutput::failed(1, "No such image"),
            1,
        );

        push_only(&executor, &commands, &spec(&["1", "1.2"]), None)
            .await
            .unwrap();

        let tags: Vec<Vec<String>> = runner
            .steps()
            .iter()
            .filter(|s| s.kind() == StepKind::Tag)
            .map(|s| s.args().to_vec())
            .collect();
        assert_eq!(tags, vec![vec!["tag", "acme/app:1.2", "acme/app:1"]]);
    }

    #[tokio::test]
    async fn test_push_only_missing_source() {
        let (runner, executor, commands) = setup();
        runner.fail_on(&["image", "inspect"]);

        let err = push_only(&executor, &commands, &spec(&["v9"]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SourceImageNotFound(_)));
        assert_eq!(runner.count(StepKind::Push), 0);
    }

    #[tokio::test]
    async fn test_tarball_push() {
        let (runner, executor, commands) = setup();
        runner.respond(&["load"], StepOutput::ok("Loaded image: built/app:local\n"));
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar");
        std::fs::write(&archive, b"tar").unwrap();

        let outcome = tarball_push(&executor, &commands, &spec(&["3", "3.1"]), &archive)
            .await
            .unwrap();

        assert_eq!(outcome.pushed_tags, vec!["3"]);
        let args = runner.args();
        assert_eq!(args[0][..2], ["load", "-i"]);
        assert_eq!(args[1], vec!["tag", "built/app:local", "acme/app:3"]);
        assert_eq!(args[2], vec!["push", "acme/app:3"]);
    }

    #[tokio::test]
    async fn test_tarball_unparseable_output() {
        let (runner, executor, commands) = setup();
        runner.respond(&["load"], StepOutput::ok("nothing useful\n"));
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar");
        std::fs::write(&archive, b"tar").unwrap();

        let err = tarball_push(&executor, &commands, &spec(&["3"]), &archive)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::LoadedImageUnparseable(_)));
        assert_eq!(runner.count(StepKind::Push), 0);
    }

    #[tokio::test]
    async fn test_tarball_missing_archive() {
        let (runner, executor, commands) = setup();

        let err = tarball_push(
            &executor,
            &commands,
            &spec(&["3"]),
            Path::new("/nonexistent/app.tar"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::TarballNotFound(_)));
        assert!(runner.steps().is_empty());
    }
}
