//! Batch pipeline: aggregate, rewrite, report, propose

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::aggregate::{aggregate, LearningConflict};
use crate::config::HealConfig;
use crate::error::HealResult;
use crate::git::{CommandRunner, GitAutomation, GitOutcome};
use crate::report::ChangeSet;
use crate::rewrite::{apply_rewrites, change_set, discover_spec_files, plan_rewrites, LiteralRewriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// No run artifact carried a usable learning
    NoLearnings,
    /// The spec directory holds no spec files
    NoSpecFiles,
    /// Learnings exist but no spec file contains a primary literal
    NoChanges,
    /// Changes were computed and reported but not written
    DryRun,
    /// Spec files were rewritten
    Applied,
}

/// Everything one pipeline run did, for console and JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub dry_run: bool,
    pub artifacts_loaded: usize,
    pub artifacts_skipped: usize,
    /// Aggregated primary -> fallback map
    pub learnings: BTreeMap<String, String>,
    pub conflicts: Vec<LearningConflict>,
    /// Primaries left alone because their learnings form a cycle
    pub cyclic: Vec<String>,
    pub spec_files_scanned: usize,
    pub changes: ChangeSet,
    pub git: Option<GitOutcome>,
}

impl PipelineReport {
    fn new(status: PipelineStatus, config: &HealConfig) -> Self {
        Self {
            status,
            dry_run: config.dry_run,
            artifacts_loaded: 0,
            artifacts_skipped: 0,
            learnings: BTreeMap::new(),
            conflicts: Vec::new(),
            cyclic: Vec::new(),
            spec_files_scanned: 0,
            changes: ChangeSet::default(),
            git: None,
        }
    }

    pub fn learning_count(&self) -> usize {
        self.learnings.len()
    }
}

/// Runs the stages in order on a single thread; spec files are fully
/// written before any git command starts.
pub struct Pipeline<'a, R: CommandRunner + ?Sized> {
    config: &'a HealConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> Pipeline<'a, R> {
    pub fn new(config: &'a HealConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// Only unreadable results/spec directories and write failures are errors
    pub async fn run(&self) -> HealResult<PipelineReport> {
        let config = self.config;

        let aggregation = aggregate(&config.results_dir, &config.learnings_suffix)?;
        let mut report = PipelineReport::new(PipelineStatus::NoLearnings, config);
        report.artifacts_loaded = aggregation.artifacts_loaded.len();
        report.artifacts_skipped = aggregation.artifacts_skipped.len();
        report.learnings = aggregation
            .learnings
            .iter()
            .map(|(p, f)| (p.to_string(), f.to_string()))
            .collect();
        report.conflicts = aggregation.conflicts.clone();

        if aggregation.count() == 0 {
            info!("No learnings found in {}", config.results_dir.display());
            return Ok(report);
        }
        info!("Loaded {} learning(s)", aggregation.count());

        let files = discover_spec_files(config)?;
        report.spec_files_scanned = files.len();
        if files.is_empty() {
            info!("No spec files found in {}", config.spec_dir.display());
            report.status = PipelineStatus::NoSpecFiles;
            return Ok(report);
        }

        let (resolved, cyclic) = aggregation.learnings.resolved();
        for primary in &cyclic {
            warn!("Skipping '{}': its learned fallbacks form a cycle", primary);
        }
        report.cyclic = cyclic;

        let plans = match LiteralRewriter::new(&resolved)? {
            Some(rewriter) => plan_rewrites(&files, &rewriter),
            None => Vec::new(),
        };
        if plans.is_empty() {
            info!("No spec file uses a learned primary selector; nothing to change");
            report.status = PipelineStatus::NoChanges;
            return Ok(report);
        }

        if config.dry_run {
            report.changes = change_set(&plans);
            report.status = PipelineStatus::DryRun;
            info!(
                "Dry run: {} file(s) would change; no files were written",
                report.changes.file_count()
            );
            return Ok(report);
        }

        report.changes = apply_rewrites(&plans)?;
        report.status = PipelineStatus::Applied;
        info!(
            "Applied {} replacement(s) across {} file(s)",
            report.changes.replacement_count(),
            report.changes.file_count()
        );

        let git = GitAutomation::new(self.runner, config);
        report.git = Some(git.propose(&report.changes, Utc::now()).await);

        Ok(report)
    }
}
