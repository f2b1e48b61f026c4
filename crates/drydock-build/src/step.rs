//! Executable step descriptors
//!
//! A [`CommandStep`] is an external program, its argument vector, and the
//! policy applied when it fails. Steps are immutable once built.

use std::fmt;

/// What to do when a step exits unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the pipeline.
    Fatal,
    /// Print the warning and continue with the next step.
    IgnoreWithWarning(String),
}

/// Operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Daemon,
    Version,
    Info,
    Login,
    Pull,
    Build,
    Tag,
    Push,
    Prune,
    RemoveImage,
    Save,
    Load,
    Inspect,
    BuilderCreate,
    BuilderInspect,
    BuilderRemove,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Daemon => "daemon",
            StepKind::Version => "version",
            StepKind::Info => "info",
            StepKind::Login => "login",
            StepKind::Pull => "pull",
            StepKind::Build => "build",
            StepKind::Tag => "tag",
            StepKind::Push => "push",
            StepKind::Prune => "prune",
            StepKind::RemoveImage => "rmi",
            StepKind::Save => "save",
            StepKind::Load => "load",
            StepKind::Inspect => "inspect",
            StepKind::BuilderCreate => "builder-create",
            StepKind::BuilderInspect => "builder-inspect",
            StepKind::BuilderRemove => "builder-remove",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    kind: StepKind,
    program: String,
    args: Vec<String>,
    policy: FailurePolicy,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
}

impl CommandStep {
    /// A step whose failure aborts the pipeline.
    pub fn fatal<I, S>(kind: StepKind, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            policy: FailurePolicy::Fatal,
            envs: Vec::new(),
            stdin: None,
        }
    }

    /// Downgrades failures of this step to the given warning.
    pub fn ignore_with_warning(mut self, warning: impl Into<String>) -> Self {
        self.policy = FailurePolicy::IgnoreWithWarning(warning.into());
        self
    }

    /// Extra environment for this step only.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Data streamed over standard input instead of the argument vector.
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Program and arguments, secrets redacted.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(redact_args(&self.args));
        parts.join(" ")
    }

    /// Audit line printed before the step runs.
    pub fn trace_line(&self) -> String {
        format!("+ {}", self.command_line())
    }
}

const REDACTED: &str = "******";
const SENSITIVE_FLAGS: &[&str] = &["-p", "--password"];
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "api_key", "private_key"];

/// Replaces secret-bearing values in an argument vector.
///
/// Covers the value after `-p`/`--password`, `--password=...`, and build
/// arguments whose key looks like a credential.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut redact_next = false;
    let mut build_arg_next = false;

    for arg in args {
        if redact_next {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        if build_arg_next {
            out.push(redact_build_arg(arg));
            build_arg_next = false;
            continue;
        }

        if SENSITIVE_FLAGS.contains(&arg.as_str()) {
            redact_next = true;
            out.push(arg.clone());
        } else if arg == "--build-arg" {
            build_arg_next = true;
            out.push(arg.clone());
        } else if arg.starts_with("--password=") {
            out.push(format!("--password={}", REDACTED));
        } else {
            out.push(arg.clone());
        }
    }
    out
}

fn redact_build_arg(arg: &str) -> String {
    match arg.split_once('=') {
        Some((key, _)) if is_sensitive_key(key) => format!("{}={}", key, REDACTED),
        _ => arg.to_string(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|pattern| key.contains(pattern))
}
