//! Recording [`CommandRunner`] for unit tests.

use crate::error::{PipelineError, Result};
use crate::executor::{CommandRunner, OutputMode, StepOutput};
use crate::step::{CommandStep, StepKind};
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

struct Rule {
    prefix: Vec<String>,
    output: StepOutput,
    remaining: Option<usize>,
}

#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<(CommandStep, OutputMode)>>,
    detached: Mutex<Vec<(CommandStep, OutputMode)>>,
    rules: Mutex<Vec<Rule>>,
    unspawnable: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripted output for every step whose args start with `prefix`.
    pub(crate) fn respond(&self, prefix: &[&str], output: StepOutput) {
        self.push_rule(prefix, output, None);
    }

    /// Scripted output for the next `times` matching steps only.
    pub(crate) fn respond_times(&self, prefix: &[&str], output: StepOutput, times: usize) {
        self.push_rule(prefix, output, Some(times));
    }

    pub(crate) fn fail_on(&self, prefix: &[&str]) {
        self.respond(prefix, StepOutput::failed(1, "scripted failure"));
    }

    /// Steps whose args start with `prefix` fail to spawn.
    pub(crate) fn unspawnable(&self, prefix: &[&str]) {
        self.unspawnable
            .lock()
            .unwrap()
            .push(prefix.iter().map(|s| s.to_string()).collect());
    }

    fn push_rule(&self, prefix: &[&str], output: StepOutput, remaining: Option<usize>) {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
            remaining,
        });
    }

    fn lookup(&self, step: &CommandStep) -> StepOutput {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) || !step.args().starts_with(&rule.prefix) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return rule.output.clone();
        }
        StepOutput::ok("")
    }

    pub(crate) fn steps(&self) -> Vec<CommandStep> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(step, _)| step.clone())
            .collect()
    }

    pub(crate) fn args(&self) -> Vec<Vec<String>> {
        self.steps().iter().map(|s| s.args().to_vec()).collect()
    }

    pub(crate) fn modes(&self) -> Vec<OutputMode> {
        self.calls.lock().unwrap().iter().map(|(_, m)| *m).collect()
    }

    pub(crate) fn count(&self, kind: StepKind) -> usize {
        self.steps().iter().filter(|s| s.kind() == kind).count()
    }

    pub(crate) fn detached(&self) -> Vec<(CommandStep, OutputMode)> {
        self.detached.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, step: &CommandStep, output: OutputMode) -> Result<StepOutput> {
        self.calls.lock().unwrap().push((step.clone(), output));
        let unspawnable = self.unspawnable.lock().unwrap();
        if unspawnable.iter().any(|prefix| step.args().starts_with(prefix)) {
            return Err(PipelineError::Spawn {
                program: step.program().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        Ok(self.lookup(step))
    }

    fn spawn_detached(&self, step: &CommandStep, output: OutputMode) -> Result<()> {
        self.detached.lock().unwrap().push((step.clone(), output));
        Ok(())
    }
}

/// Log sink for asserting on emitted tracing events.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Installs a debug-level subscriber for the current thread.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
