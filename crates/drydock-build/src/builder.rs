//! Ephemeral multi-platform builder lifecycle
//!
//! `Uninitialized -> Created -> Inspected -> Removed`. With the local driver
//! every transition is a no-op and the handle stays [`BuilderHandle::Default`].

use crate::commands::CommandBuilder;
use crate::error::{PipelineError, Result};
use crate::executor::{Executor, StepOutcome};
use crate::model::BuildxConfig;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderHandle {
    /// Use the daemon's own builder
    Default,
    Ephemeral(String),
}

impl BuilderHandle {
    /// Fresh handle for a run: a uniquely named builder unless the driver is local.
    pub fn for_config(config: &BuildxConfig) -> Self {
        if config.is_local() {
            BuilderHandle::Default
        } else {
            BuilderHandle::Ephemeral(format!("builder-{}", uuid::Uuid::new_v4()))
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, BuilderHandle::Default)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            BuilderHandle::Default => None,
            BuilderHandle::Ephemeral(name) => Some(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Uninitialized,
    Created,
    Inspected,
    Removed,
}

pub struct BuilderLifecycle {
    handle: BuilderHandle,
    state: BuilderState,
}

impl BuilderLifecycle {
    pub fn new(handle: BuilderHandle) -> Self {
        Self {
            handle,
            state: BuilderState::Uninitialized,
        }
    }

    pub fn handle(&self) -> &BuilderHandle {
        &self.handle
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    fn failed(name: &str, err: PipelineError) -> PipelineError {
        match err {
            PipelineError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::BuilderFailed {
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub async fn create(
        &mut self,
        executor: &Executor,
        commands: &CommandBuilder,
        config: &BuildxConfig,
    ) -> Result<()> {
        if self.state != BuilderState::Uninitialized {
            return Ok(());
        }
        if let BuilderHandle::Ephemeral(name) = &self.handle {
            tracing::info!("Creating builder {} (driver: {})", name, config.driver);
            executor
                .run_step(&commands.builder_create(name, config))
                .await
                .map_err(|e| Self::failed(name, e))?;
        }
        self.state = BuilderState::Created;
        Ok(())
    }

    /// Bootstraps the builder so the first build does not pay for it.
    pub async fn inspect(&mut self, executor: &Executor, commands: &CommandBuilder) -> Result<()> {
        if self.state != BuilderState::Created {
            return Ok(());
        }
        if let BuilderHandle::Ephemeral(name) = &self.handle {
            executor
                .run_step(&commands.builder_inspect(name))
                .await
                .map_err(|e| Self::failed(name, e))?;
        }
        self.state = BuilderState::Inspected;
        Ok(())
    }

    /// Removes the builder once. Later calls, and calls before a successful
    /// create, do nothing.
    pub async fn remove(&mut self, executor: &Executor, commands: &CommandBuilder) -> Result<()> {
        match self.state {
            BuilderState::Uninitialized | BuilderState::Removed => return Ok(()),
            BuilderState::Created | BuilderState::Inspected => {}
        }
        self.state = BuilderState::Removed;

        let BuilderHandle::Ephemeral(name) = &self.handle else {
            return Ok(());
        };
        tracing::info!("Removing builder {}", name);
        match executor.run_always(&commands.builder_remove(name)).await {
            Ok(StepOutcome::Succeeded(_)) | Ok(StepOutcome::Ignored(_)) => Ok(()),
            Err(e) => Err(Self::failed(name, e)),
        }
    }
}

/// Runs `body` with a builder that is created first and removed on every
/// exit path after a successful create, panics included.
///
/// A removal failure is returned only when `body` succeeded; otherwise it is
/// logged and the body's error wins.
pub async fn with_builder<T, F, Fut>(
    executor: &Executor,
    commands: &CommandBuilder,
    config: &BuildxConfig,
    body: F,
) -> Result<T>
where
    F: FnOnce(BuilderHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut lifecycle = BuilderLifecycle::new(BuilderHandle::for_config(config));
    lifecycle.create(executor, commands, config).await?;

    let handle = lifecycle.handle().clone();
    let outcome = {
        let lifecycle = &mut lifecycle;
        AssertUnwindSafe(async move {
            lifecycle.inspect(executor, commands).await?;
            body(handle).await
        })
        .catch_unwind()
        .await
    };

    let removal = lifecycle.remove(executor, commands).await;
    match outcome {
        Ok(Ok(value)) => removal.map(|_| value),
        Ok(Err(err)) => {
            if let Err(remove_err) = removal {
                tracing::warn!("{}", remove_err);
            }
            Err(err)
        }
        Err(panic) => {
            if let Err(remove_err) = removal {
                tracing::warn!("{}", remove_err);
            }
            std::panic::resume_unwind(panic)
        }
    }
}
