//! Daemon readiness gate

use crate::commands::CommandBuilder;
use crate::error::Result;
use crate::executor::{Executor, OutputMode};
use crate::model::DaemonConfig;
use std::time::Duration;

pub const READINESS_MAX_ATTEMPTS: u32 = 15;
pub const READINESS_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded polling of the liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: READINESS_MAX_ATTEMPTS,
            interval: READINESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Daemon managed elsewhere; nothing started or polled
    Skipped,
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

/// Starts the daemon in the background. Its output is shown only in debug mode.
pub fn start_daemon(
    executor: &Executor,
    commands: &CommandBuilder,
    daemon: &DaemonConfig,
) -> Result<()> {
    let output = if daemon.debug {
        OutputMode::Inherit
    } else {
        OutputMode::Discard
    };
    executor.spawn_detached(&commands.daemon(daemon), output)
}

/// Polls `docker info` until it succeeds or the policy is exhausted.
/// Exhaustion is logged, not returned as an error.
pub async fn wait_until_ready(
    executor: &Executor,
    commands: &CommandBuilder,
    policy: ReadinessPolicy,
) -> Readiness {
    let probe = commands.info();
    for attempt in 1..=policy.max_attempts {
        if executor.probe(&probe).await {
            tracing::debug!("Daemon ready after {} attempt(s)", attempt);
            return Readiness::Ready { attempts: attempt };
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    tracing::warn!(
        "Daemon did not become ready after {} attempts, continuing anyway",
        policy.max_attempts
    );
    Readiness::TimedOut {
        attempts: policy.max_attempts,
    }
}

/// Start-then-poll gate run before any other step.
pub async fn ensure_daemon(
    executor: &Executor,
    commands: &CommandBuilder,
    daemon: &DaemonConfig,
    policy: ReadinessPolicy,
) -> Result<Readiness> {
    if daemon.disabled {
        tracing::debug!("Daemon is managed externally");
        return Ok(Readiness::Skipped);
    }
    start_daemon(executor, commands, daemon)?;
    Ok(wait_until_ready(executor, commands, policy).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StepOutput;
    use crate::step::StepKind;
    use crate::testing::FakeRunner;
    use std::sync::Arc;

    fn instant(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.max_attempts, 15);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_daemon_is_skipped() {
        let runner = Arc::new(FakeRunner::new());
        let executor = Executor::new(runner.clone());
        let daemon = DaemonConfig {
            disabled: true,
            ..Default::default()
        };

        let readiness = ensure_daemon(&executor, &CommandBuilder::default(), &daemon, instant(3))
            .await
            .unwrap();

        assert_eq!(readiness, Readiness::Skipped);
        assert!(runner.detached().is_empty());
        assert!(runner.steps().is_empty());
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond_times(&["info"], StepOutput::failed(1, "not yet"), 2);
        let executor = Executor::new(runner.clone());

        let readiness = ensure_daemon(
            &executor,
            &CommandBuilder::default(),
            &DaemonConfig::default(),
            instant(15),
        )
        .await
        .unwrap();

        assert_eq!(readiness, Readiness::Ready { attempts: 3 });
        let detached = runner.detached();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].0.kind(), StepKind::Daemon);
        assert_eq!(detached[0].1, OutputMode::Discard);
        assert!(runner.modes().iter().all(|m| *m == OutputMode::Discard));
    }

    #[tokio::test]
    async fn test_timeout_is_not_fatal() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_on(&["info"]);
        let executor = Executor::new(runner.clone());

        let readiness = wait_until_ready(&executor, &CommandBuilder::default(), instant(15)).await;

        assert_eq!(readiness, Readiness::TimedOut { attempts: 15 });
        assert_eq!(runner.count(StepKind::Info), 15);
    }

    #[tokio::test]
    async fn test_no_sleep_after_final_attempt() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_on(&["info"]);
        let executor = Executor::new(runner.clone());
        let policy = ReadinessPolicy {
            max_attempts: 1,
            interval: Duration::from_secs(60),
        };

        let readiness = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until_ready(&executor, &CommandBuilder::default(), policy),
        )
        .await
        .expect("gave up without waiting another interval");

        assert_eq!(readiness, Readiness::TimedOut { attempts: 1 });
    }

    #[tokio::test]
    async fn test_debug_daemon_output_is_streamed() {
        let runner = Arc::new(FakeRunner::new());
        let executor = Executor::new(runner.clone());
        let daemon = DaemonConfig {
            debug: true,
            ..Default::default()
        };

        start_daemon(&executor, &CommandBuilder::default(), &daemon).unwrap();
        assert_eq!(runner.detached()[0].1, OutputMode::Inherit);
    }
}
