//! Outbound facts for card writers, artifact writers and signers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry flavour, used downstream to format provider-specific links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    #[default]
    Docker,
    Ecr,
    Gcr,
    Gar,
    Acr,
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryType::Docker => write!(f, "docker"),
            RegistryType::Ecr => write!(f, "ecr"),
            RegistryType::Gcr => write!(f, "gcr"),
            RegistryType::Gar => write!(f, "gar"),
            RegistryType::Acr => write!(f, "acr"),
            RegistryType::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for RegistryType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "" | "docker" => RegistryType::Docker,
            "ecr" => RegistryType::Ecr,
            "gcr" => RegistryType::Gcr,
            "gar" => RegistryType::Gar,
            "acr" => RegistryType::Acr,
            _ => RegistryType::Custom(s.to_string()),
        })
    }
}

/// Terminal facts of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Resolved image digest. Absence is reported, never fatal.
    pub digest: Option<String>,
    /// Tags actually pushed, in push order
    pub pushed_tags: Vec<String>,
    pub repo: String,
    pub registry: String,
    pub registry_type: RegistryType,
    /// Best-effort failures downgraded to warnings
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PipelineResult {
    /// `repo@digest` when the digest is known.
    pub fn digest_ref(&self) -> Option<String> {
        self.digest
            .as_ref()
            .map(|digest| format!("{}@{}", self.repo, digest))
    }

    /// `repo:tag` for every pushed tag.
    pub fn tag_refs(&self) -> Vec<String> {
        self.pushed_tags
            .iter()
            .map(|tag| format!("{}:{}", self.repo, tag))
            .collect()
    }
}

/// Consumer invoked after a successful, non-dry-run push (signers, artifact
/// writers). A hook error is logged as a warning.
#[async_trait]
pub trait PostPushHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_push(&self, result: &PipelineResult) -> anyhow::Result<()>;
}
