use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("Authentication failed for {registry}: {message}")]
    AuthenticationFailed { registry: String, message: String },

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Builder {name} failed: {message}")]
    BuilderFailed { name: String, message: String },

    #[error("Command failed ({status}): {command}")]
    StepFailed { command: String, status: String },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source image not found: {0}")]
    SourceImageNotFound(String),

    #[error("Image archive not found: {0}")]
    TarballNotFound(PathBuf),

    #[error("Could not determine the loaded image from output: {0}")]
    LoadedImageUnparseable(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Message with a remediation hint for the failures users hit most often.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ConfigConflict(msg) => {
                format!(
                    "Configuration conflict: {}\n\
                     \n\
                     Nothing was executed. Adjust the step settings and retry.",
                    msg
                )
            }
            PipelineError::AuthenticationFailed { registry, .. } => {
                format!(
                    "Could not log in to {}\n\
                     \n\
                     Check the username/password or access token configured for this registry.",
                    registry
                )
            }
            PipelineError::SourceImageNotFound(image) => {
                format!(
                    "Source image not found locally: {}\n\
                     \n\
                     Push-only mode publishes an existing image. Build or pull it in an earlier step.",
                    image
                )
            }
            PipelineError::TarballNotFound(path) => {
                format!(
                    "Image archive not found: {}\n\
                     \n\
                     Save the image first, e.g. docker save -o {} <image>",
                    path.display(),
                    path.display()
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
