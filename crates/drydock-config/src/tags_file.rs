//! `.tags.yml` override read from the build context

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::Path;

pub const TAGS_FILE: &str = ".tags.yml";

#[derive(Debug, Deserialize)]
struct TagsFile {
    #[serde(default)]
    tags: Vec<String>,
}

/// Tags listed in `<context>/.tags.yml`, or `None` when the file is absent.
pub fn read_tags_file(context: &Path) -> Result<Option<Vec<String>>> {
    let path = context.join(TAGS_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let file: TagsFile = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    tracing::info!("Tags from {}: {}", path.display(), file.tags.join(", "));
    Ok(Some(file.tags))
}
