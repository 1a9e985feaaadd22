//! Merging run artifacts into one primary -> fallback map

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{HealError, HealResult};
use crate::learning::{is_valid_learning, RunArtifact};

/// Where an aggregated learning came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedFallback {
    pub fallback: String,
    pub source: String,
}

/// A record dropped because an earlier artifact already covered its primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningConflict {
    pub primary: String,
    pub kept: LearnedFallback,
    pub dropped: LearnedFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub path: PathBuf,
    pub reason: String,
}

/// Exactly one fallback per primary; the first artifact processed wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedLearnings {
    entries: BTreeMap<String, LearnedFallback>,
}

impl AggregatedLearnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the primary is already known. On conflict the existing
    /// entry is kept and the rejected one is returned.
    pub fn insert_first(
        &mut self,
        primary: &str,
        fallback: &str,
        source: &str,
    ) -> Option<LearningConflict> {
        if !is_valid_learning(primary, fallback) {
            return None;
        }
        match self.entries.get(primary) {
            None => {
                self.entries.insert(
                    primary.to_string(),
                    LearnedFallback {
                        fallback: fallback.to_string(),
                        source: source.to_string(),
                    },
                );
                None
            }
            Some(existing) if existing.fallback == fallback => None,
            Some(existing) => Some(LearningConflict {
                primary: primary.to_string(),
                kept: existing.clone(),
                dropped: LearnedFallback {
                    fallback: fallback.to_string(),
                    source: source.to_string(),
                },
            }),
        }
    }

    pub fn get(&self, primary: &str) -> Option<&str> {
        self.entries.get(primary).map(|e| e.fallback.as_str())
    }

    pub fn source(&self, primary: &str) -> Option<&str> {
        self.entries.get(primary).map(|e| e.source.as_str())
    }

    /// Number of distinct primaries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(primary, entry)| (primary.as_str(), entry.fallback.as_str()))
    }

    /// Follow chains to their final fallback (`a -> b`, `b -> c` gives
    /// `a -> c`, `b -> c`). Primaries whose chain runs into a cycle have no
    /// stable target and are returned separately.
    pub fn resolved(&self) -> (BTreeMap<String, String>, Vec<String>) {
        let mut resolved = BTreeMap::new();
        let mut cyclic = Vec::new();

        for (primary, entry) in &self.entries {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            seen.insert(primary.as_str());
            let mut target = entry.fallback.as_str();
            let mut stable = true;

            while let Some(next) = self.entries.get(target) {
                if !seen.insert(target) {
                    stable = false;
                    break;
                }
                target = next.fallback.as_str();
            }

            if stable {
                resolved.insert(primary.clone(), target.to_string());
            } else {
                cyclic.push(primary.clone());
            }
        }

        (resolved, cyclic)
    }
}

impl FromIterator<(String, String)> for AggregatedLearnings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut learnings = Self::new();
        for (primary, fallback) in iter {
            learnings.insert_first(&primary, &fallback, "inline");
        }
        learnings
    }
}

/// Result of scanning a results directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregation {
    pub learnings: AggregatedLearnings,
    pub artifacts_loaded: Vec<PathBuf>,
    pub artifacts_skipped: Vec<SkippedArtifact>,
    pub conflicts: Vec<LearningConflict>,
}

impl Aggregation {
    /// Distinct primaries discovered
    pub fn count(&self) -> usize {
        self.learnings.len()
    }

    /// Fold one parsed artifact into the aggregate
    pub fn merge(&mut self, source: &str, artifact: &RunArtifact) {
        let mut accepted = 0;
        for record in artifact.records() {
            accepted += 1;
            if let Some(conflict) = self
                .learnings
                .insert_first(&record.primary, &record.fallback, source)
            {
                warn!(
                    "Conflicting learning for '{}': keeping '{}' from {}, dropping '{}' from {}",
                    conflict.primary,
                    conflict.kept.fallback,
                    conflict.kept.source,
                    conflict.dropped.fallback,
                    conflict.dropped.source
                );
                self.conflicts.push(conflict);
            }
        }
        let ignored = artifact.working_fallbacks.len() - accepted;
        if ignored > 0 {
            debug!("Ignored {} no-op learning(s) in {}", ignored, source);
        }
    }
}

/// Find run artifacts under `dir`, ordered by their path relative to it.
///
/// An unreadable root is fatal; unreadable entries below it are skipped.
pub fn discover_artifacts(dir: &Path, suffix: &str) -> HealResult<Vec<PathBuf>> {
    std::fs::read_dir(dir).map_err(|e| HealError::ResultsDirUnreadable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut artifacts: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| name.ends_with(suffix))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();

    artifacts.sort_by(|a, b| relative(dir, a).cmp(&relative(dir, b)));
    Ok(artifacts)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Load and merge every artifact in `dir`.
///
/// Malformed artifacts are skipped with a warning and never abort the scan.
pub fn aggregate(dir: &Path, suffix: &str) -> HealResult<Aggregation> {
    let paths = discover_artifacts(dir, suffix)?;
    info!("Found {} run artifact(s) in {}", paths.len(), dir.display());

    let mut aggregation = Aggregation::default();
    for path in paths {
        let source = relative(dir, &path);
        match RunArtifact::from_file(&path) {
            Ok(artifact) => {
                debug!(
                    "Loaded {} learning(s) from {}",
                    artifact.working_fallbacks.len(),
                    source
                );
                aggregation.merge(&source, &artifact);
                aggregation.artifacts_loaded.push(path);
            }
            Err(e) => {
                warn!("Skipping artifact {}: {}", source, e);
                aggregation.artifacts_skipped.push(SkippedArtifact {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Aggregated {} distinct learning(s) ({} conflict(s) dropped)",
        aggregation.count(),
        aggregation.conflicts.len()
    );
    Ok(aggregation)
}
