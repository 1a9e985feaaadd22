//! Batch pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HealError, HealResult};

/// Suffix identifying run artifacts inside the results directory
pub const DEFAULT_LEARNINGS_SUFFIX: &str = ".learnings.json";

/// Configuration shared by every stage of the batch pipeline.
///
/// Built once at the entry point and passed by reference; nothing below the
/// CLI reads the process environment or working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// Directory scanned for run artifacts
    pub results_dir: PathBuf,

    /// Directory walked for spec files
    pub spec_dir: PathBuf,

    /// Working tree the git automation runs in
    pub repo_dir: PathBuf,

    /// Filename suffix of run artifacts
    pub learnings_suffix: String,

    /// Filename suffixes recognized as spec files
    pub spec_suffixes: Vec<String>,

    /// Plan and report without writing files or touching git
    pub dry_run: bool,

    /// Open a pull request after committing
    pub open_pr: bool,

    /// Push the healing branch to the remote
    pub push: bool,

    /// Prefix of generated branch names
    pub branch_prefix: String,

    /// Base branch for pull requests (remote default when unset)
    pub base_branch: Option<String>,

    /// Remote the branch is pushed to
    pub remote: String,

    /// Upper bound for every external command
    pub command_timeout_secs: u64,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("test-results"),
            spec_dir: PathBuf::from("tests/e2e"),
            repo_dir: PathBuf::from("."),
            learnings_suffix: DEFAULT_LEARNINGS_SUFFIX.to_string(),
            spec_suffixes: [
                ".spec.ts", ".spec.tsx", ".spec.js", ".spec.jsx",
                ".test.ts", ".test.tsx", ".test.js", ".test.jsx",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            dry_run: false,
            open_pr: false,
            push: false,
            branch_prefix: "selfheal/selectors".to_string(),
            base_branch: None,
            remote: "origin".to_string(),
            command_timeout_secs: 300,
        }
    }
}

impl HealConfig {
    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml(content: &str) -> HealResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> HealResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> HealResult<()> {
        if self.learnings_suffix.is_empty() {
            return Err(HealError::InvalidConfig(
                "learnings_suffix must not be empty".into(),
            ));
        }
        if self.spec_suffixes.iter().all(|s| s.is_empty()) {
            return Err(HealError::InvalidConfig(
                "spec_suffixes must name at least one suffix".into(),
            ));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(HealError::InvalidConfig(
                "branch_prefix must not be empty".into(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(HealError::InvalidConfig(
                "command_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Whether the branch has to reach the remote
    pub fn wants_push(&self) -> bool {
        self.push || self.open_pr
    }

    pub fn is_spec_file(&self, file_name: &str) -> bool {
        self.spec_suffixes
            .iter()
            .any(|suffix| !suffix.is_empty() && file_name.ends_with(suffix.as_str()))
    }
}
