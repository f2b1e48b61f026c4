//! Login phase
//!
//! Runs before any pipeline step: writes the auth config document, logs in
//! to the base-image registry, then to the push registry. Every failure here
//! is fatal except an unused base-image connector.

use crate::commands::CommandBuilder;
use crate::credentials::write_auth_config;
use crate::error::{PipelineError, Result};
use crate::executor::Executor;
use crate::model::{BaseImageCredentials, BaseImageLogin, LoginCredentials, LoginKind};
use std::path::Path;

const INSECURE_PASSWORD_WARNING: &str =
    "WARNING! Using --password via the CLI is insecure. Use --password-stdin.";
const LOGIN_SUCCEEDED: &str = "Login Succeeded";

/// Removes the CLI's insecure-password warning from login output.
pub fn scrub_login_output(output: &str) -> String {
    output
        .replace(INSECURE_PASSWORD_WARNING, "")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Logs which kind of credential was supplied.
pub fn log_credential_detection(login: &LoginCredentials) {
    let has_password = login.kind() == LoginKind::Password;
    match (has_password, login.has_auth_config(), login.kind()) {
        (true, true, _) => tracing::info!("Detected registry credentials and registry credentials file"),
        (true, false, _) => tracing::info!("Detected registry credentials"),
        (false, true, _) => tracing::info!("Detected registry credentials file"),
        (false, false, LoginKind::AccessToken) => tracing::info!("Detected access token"),
        _ => tracing::info!("Registry credentials or Docker config not provided. Guest mode enabled."),
    }
}

pub struct LoginPhase<'a> {
    executor: &'a Executor,
    commands: &'a CommandBuilder,
    docker_home: &'a Path,
}

impl<'a> LoginPhase<'a> {
    pub fn new(executor: &'a Executor, commands: &'a CommandBuilder, docker_home: &'a Path) -> Self {
        Self {
            executor,
            commands,
            docker_home,
        }
    }

    /// Full login phase. `push_only` silences the base-image connector hint.
    pub async fn run(
        &self,
        login: &LoginCredentials,
        base: &BaseImageCredentials,
        push_only: bool,
    ) -> Result<()> {
        log_credential_detection(login);

        if let Some(document) = login.auth_config.as_deref().filter(|d| !d.is_empty()) {
            write_auth_config(self.docker_home, document)?;
        }

        self.base_image_login(base, push_only).await?;
        self.primary_login(login).await
    }

    pub async fn base_image_login(&self, base: &BaseImageCredentials, push_only: bool) -> Result<()> {
        match base.classify() {
            BaseImageLogin::Unused => {
                if !push_only {
                    tracing::warn!(
                        "To ensure consistent and reliable pipeline execution, we recommend setting up a Base Image Connector. \
                         While optional at this time, configuring it helps prevent failures caused by Docker Hub's rate limits."
                    );
                }
                Ok(())
            }
            BaseImageLogin::Partial => Err(PipelineError::MissingCredentials(
                "The base image connector requires both a username and a password".to_string(),
            )),
            BaseImageLogin::Complete {
                registry,
                username,
                password,
            } => {
                let step = self.commands.login(&registry, &username, &password, None);
                self.run_login(&registry, &step, None).await
            }
        }
    }

    /// Password login when a password is set, otherwise access-token login.
    pub async fn primary_login(&self, login: &LoginCredentials) -> Result<()> {
        match login.kind() {
            LoginKind::Password => {
                let step = self.commands.login(
                    &login.registry,
                    login.username.as_deref().unwrap_or_default(),
                    login.password.as_deref().unwrap_or_default(),
                    login.email.as_deref(),
                );
                self.run_login(&login.registry, &step, None).await
            }
            LoginKind::AccessToken => {
                let token = login.access_token.as_deref().unwrap_or_default();
                let step = self.commands.login_access_token(&login.registry, token);
                self.run_login(&login.registry, &step, Some(LOGIN_SUCCEEDED))
                    .await?;
                tracing::info!("Login successful");
                Ok(())
            }
            LoginKind::Guest => Ok(()),
        }
    }

    async fn run_login(
        &self,
        registry: &str,
        step: &crate::step::CommandStep,
        expect: Option<&str>,
    ) -> Result<()> {
        let output = self.executor.run_captured(step).await?;
        let scrubbed = scrub_login_output(&output.combined());
        if !scrubbed.is_empty() {
            println!("{}", scrubbed);
        }

        if !output.success {
            return Err(PipelineError::AuthenticationFailed {
                registry: registry.to_string(),
                message: if scrubbed.is_empty() {
                    output.status_text()
                } else {
                    scrubbed
                },
            });
        }
        if let Some(marker) = expect
            && !output.combined().contains(marker)
        {
            return Err(PipelineError::AuthenticationFailed {
                registry: registry.to_string(),
                message: "login did not succeed".to_string(),
            });
        }
        Ok(())
    }
}
