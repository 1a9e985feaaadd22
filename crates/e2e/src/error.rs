//! Error types for selector healing

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HealError {
    #[error("No selector resolved for '{primary}' (tried {} selector(s): {})", attempted.len(), attempted.join(", "))]
    NoSelectorResolved {
        primary: String,
        attempted: Vec<String>,
    },

    #[error("Element query failed for '{selector}': {reason}")]
    Query { selector: String, reason: String },

    #[error("Cannot read results directory {}: {reason}", path.display())]
    ResultsDirUnreadable { path: PathBuf, reason: String },

    #[error("Cannot read spec directory {}: {reason}", path.display())]
    SpecDirUnreadable { path: PathBuf, reason: String },

    #[error("Malformed run artifact {}: {reason}", path.display())]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("Unknown selector chain: {0}")]
    UnknownChain(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command '{command}' timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

pub type HealResult<T> = Result<T, HealError>;
