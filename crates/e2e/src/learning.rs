//! Run-local learnings and the artifact each run leaves behind

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::DEFAULT_LEARNINGS_SUFFIX;
use crate::error::{HealError, HealResult};

/// A fallback that resolved where the primary selector did not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub primary: String,
    pub fallback: String,
}

impl LearningRecord {
    /// Build a record, rejecting no-op and empty learnings
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Option<Self> {
        let primary = primary.into();
        let fallback = fallback.into();
        if is_valid_learning(&primary, &fallback) {
            Some(Self { primary, fallback })
        } else {
            None
        }
    }
}

/// An empty primary would match every empty literal in source.
pub fn is_valid_learning(primary: &str, fallback: &str) -> bool {
    !primary.is_empty() && !fallback.is_empty() && primary != fallback
}

/// Serialized form of one run's learnings.
///
/// Only `workingFallbacks` is required when reading; everything else is run
/// metadata and is carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    #[serde(rename = "workingFallbacks")]
    pub working_fallbacks: BTreeMap<String, String>,

    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RunArtifact {
    pub fn from_json(json: &str) -> HealResult<Self> {
        serde_json::from_str(json).map_err(HealError::from)
    }

    pub fn from_file(path: &Path) -> HealResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| HealError::MalformedArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Records in key order, skipping entries that are not real learnings
    pub fn records(&self) -> impl Iterator<Item = LearningRecord> + '_ {
        self.working_fallbacks
            .iter()
            .filter_map(|(primary, fallback)| LearningRecord::new(primary.as_str(), fallback.as_str()))
    }
}

/// Identifier of one test run; doubles as the artifact file stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    /// Timestamp plus a random suffix so parallel workers never share a file
    pub fn generate(worker: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            sanitize(worker),
            Utc::now().format("%Y%m%dT%H%M%S"),
            &suffix[..8]
        ))
    }

    pub fn from_name(name: &str) -> Self {
        Self(sanitize(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn artifact_file_name(&self) -> String {
        format!("{}{}", self.0, DEFAULT_LEARNINGS_SUFFIX)
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}

/// In-memory learnings for a single worker's run.
///
/// Each worker owns its store outright; isolation between workers comes from
/// distinct artifact files, not locking.
#[derive(Debug, Clone)]
pub struct LearningStore {
    worker: String,
    started_at: DateTime<Utc>,
    fallbacks: BTreeMap<String, String>,
}

impl LearningStore {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            started_at: Utc::now(),
            fallbacks: BTreeMap::new(),
        }
    }

    /// Record a healed selector. Returns whether anything was stored; the
    /// first fallback seen for a primary in this run is kept.
    pub fn record(&mut self, primary: &str, fallback: &str) -> bool {
        let Some(record) = LearningRecord::new(primary, fallback) else {
            debug!("Discarding no-op learning for '{}'", primary);
            return false;
        };
        if self.fallbacks.contains_key(&record.primary) {
            return false;
        }
        debug!("Learned '{}' -> '{}'", record.primary, record.fallback);
        self.fallbacks.insert(record.primary, record.fallback);
        true
    }

    pub fn get(&self, primary: &str) -> Option<&str> {
        self.fallbacks.get(primary).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fallbacks.is_empty()
    }

    pub fn to_artifact(&self, run_id: &RunId) -> RunArtifact {
        let mut metadata = serde_json::Map::new();
        metadata.insert("runId".into(), run_id.as_str().into());
        metadata.insert("worker".into(), self.worker.clone().into());
        metadata.insert("startedAt".into(), self.started_at.to_rfc3339().into());
        metadata.insert("generatedAt".into(), Utc::now().to_rfc3339().into());
        metadata.insert("learningCount".into(), self.fallbacks.len().into());
        RunArtifact {
            working_fallbacks: self.fallbacks.clone(),
            metadata,
        }
    }

    /// Write this run's artifact into `dir`.
    ///
    /// The JSON goes to a temporary file first and is renamed into place, so
    /// a concurrent aggregator never reads half an artifact.
    pub fn write_artifact(&self, dir: &Path, run_id: &RunId) -> HealResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(run_id.artifact_file_name());
        let json = serde_json::to_string_pretty(&self.to_artifact(run_id))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| HealError::Io(e.error))?;

        info!(
            "Wrote {} learning(s) to {}",
            self.fallbacks.len(),
            path.display()
        );
        Ok(path)
    }
}
