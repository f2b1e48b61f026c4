use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Settings file not found. Looked for:\n\
        - the path in DRYDOCK_CONFIG\n\
        - drydock.yml, drydock.yaml, drydock.json, .drydock.yml in the current directory\n\
        - ~/.config/drydock/drydock.yml"
    )]
    SettingsFileNotFound,

    #[error("Unsupported settings format: {0} (expected .yml, .yaml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Could not parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{field} must be specified for registry: {registry}")]
    MissingCredential { registry: String, field: String },

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
