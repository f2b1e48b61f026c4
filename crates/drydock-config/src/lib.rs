pub mod docker_config;
pub mod env;
pub mod error;
pub mod settings;
pub mod tags_file;

pub use docker_config::{DEFAULT_REGISTRY, DockerConfig, RegistryCredentials, build_auth_config};
pub use env::AmbientEnv;
pub use error::*;
pub use settings::{Settings, find_settings_file};
pub use tags_file::{TAGS_FILE, read_tags_file};

use std::path::Path;

/// Loads settings from an explicit path, or searches the usual locations.
/// With no file anywhere, defaults are used.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    if let Some(path) = path {
        return Settings::load(path);
    }
    match find_settings_file() {
        Ok(path) => Settings::load(&path),
        Err(ConfigError::SettingsFileNotFound) => {
            tracing::debug!("No settings file found, using defaults");
            Ok(Settings::default())
        }
        Err(e) => Err(e),
    }
}
