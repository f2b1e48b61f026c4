//! Docker `config.json` generation

use crate::error::{ConfigError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub auth: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub auths: BTreeMap<String, AuthEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl DockerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `base64(username:password)` for a registry.
    pub fn set_auth(&mut self, registry: &str, username: &str, password: &str) {
        let auth = STANDARD.encode(format!("{}:{}", username, password));
        self.auths.insert(registry.to_string(), AuthEntry { auth });
    }

    /// Adds Docker Hub style registries (any host containing `docker`).
    /// Those require both username and password.
    pub fn add_credentials(&mut self, credentials: &[RegistryCredentials]) -> Result<()> {
        for cred in credentials {
            if cred.registry.is_empty() || !cred.registry.contains("docker") {
                continue;
            }
            if cred.username.is_empty() {
                return Err(ConfigError::MissingCredential {
                    registry: cred.registry.clone(),
                    field: "Username".to_string(),
                });
            }
            if cred.password.is_empty() {
                return Err(ConfigError::MissingCredential {
                    registry: cred.registry.clone(),
                    field: "Password".to_string(),
                });
            }
            self.set_auth(&cred.registry, &cred.username, &cred.password);
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Auth document for the push registry (when a password is set) and the
/// base-image registry (when one is named).
pub fn build_auth_config(
    push: Option<RegistryCredentials>,
    base_image: Option<RegistryCredentials>,
) -> Result<String> {
    let credentials: Vec<RegistryCredentials> = push
        .into_iter()
        .filter(|c| !c.password.is_empty())
        .chain(base_image.into_iter().filter(|c| !c.registry.is_empty()))
        .collect();

    let mut config = DockerConfig::new();
    config.add_credentials(&credentials)?;
    config.to_json()
}
