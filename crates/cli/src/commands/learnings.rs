//! Learnings Command
//!
//! Shows what the aggregator would hand to the rewriter.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use selfheal_e2e::{aggregate, Aggregation};

use super::load_config;
use crate::output::{print_document, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug, Default)]
pub struct LearningsArgs {
    /// Directory holding run artifacts
    #[arg(long, env = "SELFHEAL_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Also list learnings dropped in favour of an earlier artifact
    #[arg(short, long)]
    pub conflicts: bool,
}

/// One aggregated learning for display
#[derive(Serialize, Clone)]
pub struct LearningRow {
    pub primary: String,
    pub fallback: String,
    pub source: String,
}

impl TableDisplay for LearningRow {
    fn headers() -> Vec<&'static str> {
        vec!["Primary", "Fallback", "Source"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.primary.clone(), self.fallback.clone(), self.source.clone()]
    }
}

/// A learning that lost to an earlier artifact
#[derive(Serialize, Clone)]
pub struct ConflictRow {
    pub primary: String,
    pub kept: String,
    pub dropped: String,
    pub dropped_source: String,
}

impl TableDisplay for ConflictRow {
    fn headers() -> Vec<&'static str> {
        vec!["Primary", "Kept", "Dropped", "Dropped From"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.primary.clone(),
            self.kept.clone(),
            self.dropped.clone(),
            self.dropped_source.clone(),
        ]
    }
}

pub fn execute(args: LearningsArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(dir) = args.results_dir {
        config.results_dir = dir;
    }

    let aggregation = aggregate(&config.results_dir, &config.learnings_suffix)
        .context("Failed to aggregate learnings")?;

    if format.is_structured() {
        print_document(&aggregation, format);
        return Ok(());
    }

    print_list(&learning_rows(&aggregation), format);
    for skipped in &aggregation.artifacts_skipped {
        print_warning(&format!(
            "Skipped {}: {}",
            skipped.path.display(),
            skipped.reason
        ));
    }
    if args.conflicts {
        println!();
        print_list(&conflict_rows(&aggregation), format);
    } else if !aggregation.conflicts.is_empty() {
        print_warning(&format!(
            "{} conflicting learning(s) dropped; rerun with --conflicts to list them",
            aggregation.conflicts.len()
        ));
    }
    Ok(())
}

fn learning_rows(aggregation: &Aggregation) -> Vec<LearningRow> {
    aggregation
        .learnings
        .iter()
        .map(|(primary, fallback)| LearningRow {
            primary: primary.to_string(),
            fallback: fallback.to_string(),
            source: aggregation
                .learnings
                .source(primary)
                .unwrap_or_default()
                .to_string(),
        })
        .collect()
}

fn conflict_rows(aggregation: &Aggregation) -> Vec<ConflictRow> {
    aggregation
        .conflicts
        .iter()
        .map(|c| ConflictRow {
            primary: c.primary.clone(),
            kept: c.kept.fallback.clone(),
            dropped: c.dropped.fallback.clone(),
            dropped_source: c.dropped.source.clone(),
        })
        .collect()
}
