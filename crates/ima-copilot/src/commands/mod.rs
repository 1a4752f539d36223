//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};

use ima_copilot::Config;

pub mod ask;
pub mod check;
pub mod config;

/// Load configuration from `path`, or from the environment if it is missing.
pub async fn load_config(path: &Path) -> Result<Config> {
    Config::load(path)
        .await
        .with_context(|| format!("failed to load configuration from '{}'", path.display()))
}
