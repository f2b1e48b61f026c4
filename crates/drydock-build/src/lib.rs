//! Build/push orchestration for container images in CI
//!
//! This crate resolves image tags from version-control refs, builds the
//! external `docker` command steps for a run, manages the ephemeral buildx
//! builder and the local daemon, and executes the steps with per-step
//! failure policy. Build, push-only and tarball-push modes are supported.

pub mod builder;
pub mod commands;
pub mod credentials;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod facts;
pub mod login;
pub mod mode;
pub mod model;
pub mod pipeline;
pub mod reference;
pub mod step;
pub mod tags;

#[cfg(test)]
mod testing;

pub use builder::{BuilderHandle, BuilderLifecycle, BuilderState, with_builder};
pub use commands::{CommandBuilder, auto_labels, inject_proxy_build_args};
pub use daemon::{Readiness, ReadinessPolicy};
pub use error::{PipelineError, Result};
pub use executor::{
    Cancellation, CommandRunner, ExecutionReport, Executor, OutputMode, ProcessRunner, StepOutput,
};
pub use facts::{PipelineResult, PostPushHook, RegistryType};
pub use mode::{ExecutionMode, ModeFlags};
pub use model::{
    BaseImageCredentials, BuildSpec, BuildxConfig, DaemonConfig, LoginCredentials, ProxyEnv,
    Secret, VcsMetadata, parse_secrets,
};
pub use pipeline::{Pipeline, PipelineConfig};
pub use step::{CommandStep, FailurePolicy, StepKind};
pub use tags::{TagSet, auto_tags, default_tag_suffix, default_tags, resolve_tags, use_default_tag};
