//! Pipeline executor
//!
//! Runs [`CommandStep`]s strictly in order through a [`CommandRunner`],
//! tracing each invocation and applying its [`FailurePolicy`].

use crate::error::{PipelineError, Result};
use crate::step::{CommandStep, FailurePolicy};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Where a child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream to this process's stdout/stderr
    Inherit,
    Discard,
    /// Collect into [`StepOutput`]
    Capture,
}

/// Exit status and, in capture mode, output of a finished step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// stdout followed by stderr, as a terminal would show them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Subprocess boundary. Every external program runs through this trait.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the step to completion.
    async fn run(&self, step: &CommandStep, output: OutputMode) -> Result<StepOutput>;

    /// Starts the step in the background without waiting for it.
    fn spawn_detached(&self, step: &CommandStep, output: OutputMode) -> Result<()>;
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(step: &CommandStep, output: OutputMode) -> Command {
        let mut cmd = Command::new(step.program());
        cmd.args(step.args());
        for (key, value) in step.envs() {
            cmd.env(key, value);
        }
        match output {
            OutputMode::Inherit => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
            OutputMode::Discard => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
            }
        }
        cmd.stdin(if step.stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd
    }

    fn spawn_error(step: &CommandStep, source: std::io::Error) -> PipelineError {
        PipelineError::Spawn {
            program: step.program().to_string(),
            source,
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, step: &CommandStep, output: OutputMode) -> Result<StepOutput> {
        let mut child = Self::command(step, output)
            .spawn()
            .map_err(|e| Self::spawn_error(step, e))?;

        if let Some(input) = step.stdin()
            && let Some(mut stdin) = child.stdin.take()
        {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                // Reap the child before surfacing the error
                let _ = child.kill().await;
                return Err(e.into());
            }
            // Closing stdin signals end of input
            drop(stdin);
        }

        let result = child.wait_with_output().await?;
        Ok(StepOutput {
            success: result.status.success(),
            code: result.status.code(),
            stdout: String::from_utf8_lossy(&result.stdout).to_string(),
            stderr: String::from_utf8_lossy(&result.stderr).to_string(),
        })
    }

    fn spawn_detached(&self, step: &CommandStep, output: OutputMode) -> Result<()> {
        let mut child = Self::command(step, output)
            .spawn()
            .map_err(|e| Self::spawn_error(step, e))?;
        let program = step.program().to_string();

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("{} exited with {}", program, status),
                Err(e) => tracing::warn!("{} could not be awaited: {}", program, e),
            }
        });
        Ok(())
    }
}

/// Shared flag checked between steps.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Steps run and warnings raised by best-effort failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub executed: usize,
    pub warnings: Vec<String>,
}

/// Result of a single step that did not abort the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded(StepOutput),
    /// Failed under [`FailurePolicy::IgnoreWithWarning`]
    Ignored(String),
}

#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    cancellation: Cancellation,
    output: OutputMode,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cancellation: Cancellation::new(),
            output: OutputMode::Inherit,
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Output routing for ordinary steps.
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            tracing::warn!("Cancellation requested, stopping before the next step");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// The trace line goes to stdout for the CI log. The tracing event only
    /// carries structured fields so `--debug` does not repeat the line.
    fn trace(step: &CommandStep) {
        println!("{}", step.trace_line());
        tracing::debug!(kind = %step.kind(), program = step.program(), "Running step");
    }

    fn apply_policy(step: &CommandStep, output: Result<StepOutput>) -> Result<StepOutcome> {
        let status = match output {
            Ok(output) if output.success => return Ok(StepOutcome::Succeeded(output)),
            Ok(output) => output.status_text(),
            Err(e) => match step.policy() {
                FailurePolicy::Fatal => return Err(e),
                FailurePolicy::IgnoreWithWarning(_) => e.to_string(),
            },
        };
        match step.policy() {
            FailurePolicy::Fatal => Err(PipelineError::StepFailed {
                command: step.command_line(),
                status,
            }),
            FailurePolicy::IgnoreWithWarning(warning) => {
                println!("{}", warning);
                tracing::warn!(kind = %step.kind(), status = %status, "{}", warning);
                Ok(StepOutcome::Ignored(warning.clone()))
            }
        }
    }

    /// Traces, runs and applies the failure policy of one step.
    pub async fn run_step(&self, step: &CommandStep) -> Result<StepOutcome> {
        self.check_cancelled()?;
        self.run_always(step).await
    }

    /// Like [`Executor::run_step`] but ignores cancellation. Used for teardown.
    pub async fn run_always(&self, step: &CommandStep) -> Result<StepOutcome> {
        Self::trace(step);
        let output = self.runner.run(step, self.output).await;
        Self::apply_policy(step, output)
    }

    /// Runs steps in order, stopping at the first fatal failure.
    pub async fn run_steps(&self, steps: &[CommandStep], report: &mut ExecutionReport) -> Result<()> {
        for step in steps {
            let outcome = self.run_step(step).await?;
            report.executed += 1;
            if let StepOutcome::Ignored(warning) = outcome {
                report.warnings.push(warning);
            }
        }
        Ok(())
    }

    /// Traces and runs a step whose output the caller inspects. The
    /// failure policy is left to the caller.
    pub async fn run_captured(&self, step: &CommandStep) -> Result<StepOutput> {
        self.check_cancelled()?;
        Self::trace(step);
        self.runner.run(step, OutputMode::Capture).await
    }

    /// Silent run reporting only success. Spawn errors count as failure.
    /// Traced at debug level only, since readiness polls repeat.
    pub async fn probe(&self, step: &CommandStep) -> bool {
        tracing::debug!(kind = %step.kind(), "{}", step.trace_line());
        match self.runner.run(step, OutputMode::Discard).await {
            Ok(output) => output.success,
            Err(e) => {
                tracing::debug!("Probe {} failed to run: {}", step.command_line(), e);
                false
            }
        }
    }

    pub fn spawn_detached(&self, step: &CommandStep, output: OutputMode) -> Result<()> {
        self.check_cancelled()?;
        Self::trace(step);
        self.runner.spawn_detached(step, output)
    }
}
