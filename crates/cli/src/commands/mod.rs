//! CLI Commands

pub mod apply;
pub mod learnings;

use anyhow::{Context, Result};
use selfheal_e2e::HealConfig;
use std::path::Path;

/// Configuration file if given, defaults otherwise; flags are layered on by
/// each command.
pub fn load_config(path: Option<&Path>) -> Result<HealConfig> {
    match path {
        Some(path) => HealConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HealConfig::default()),
    }
}
