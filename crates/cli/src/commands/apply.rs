//! Apply Command
//!
//! Aggregates run artifacts, rewrites spec files and hands the result to git.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use selfheal_e2e::git::StepStatus;
use selfheal_e2e::rewrite::display_path;
use selfheal_e2e::{HealConfig, Pipeline, PipelineReport, PipelineStatus, SystemRunner};

use super::load_config;
use crate::output::{
    print_document, print_info, print_list, print_success, print_warning, OutputFormat,
    TableDisplay,
};

#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    /// Report planned changes without writing files or touching git
    #[arg(long, env = "SELFHEAL_DRY_RUN", value_parser = clap::builder::FalseyValueParser::new())]
    pub dry_run: bool,

    /// Open a pull request for the healing branch
    #[arg(long, env = "SELFHEAL_OPEN_PR", value_parser = clap::builder::FalseyValueParser::new())]
    pub open_pr: bool,

    /// Push the healing branch even without a pull request
    #[arg(long, env = "SELFHEAL_PUSH", value_parser = clap::builder::FalseyValueParser::new())]
    pub push: bool,

    /// Directory holding run artifacts
    #[arg(long, env = "SELFHEAL_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Directory holding spec files
    #[arg(long, env = "SELFHEAL_SPEC_DIR")]
    pub spec_dir: Option<PathBuf>,

    /// Git working tree
    #[arg(long)]
    pub repo_dir: Option<PathBuf>,

    /// Base branch for the pull request
    #[arg(long)]
    pub base_branch: Option<String>,
}

impl ApplyArgs {
    /// Layer flags over the loaded configuration; a flag can switch an
    /// option on but never off.
    pub fn apply_to(self, mut config: HealConfig) -> HealConfig {
        config.dry_run |= self.dry_run;
        config.open_pr |= self.open_pr;
        config.push |= self.push;
        if let Some(dir) = self.results_dir {
            config.results_dir = dir;
        }
        if let Some(dir) = self.spec_dir {
            config.spec_dir = dir;
        }
        if let Some(dir) = self.repo_dir {
            config.repo_dir = dir;
        }
        if self.base_branch.is_some() {
            config.base_branch = self.base_branch;
        }
        config
    }
}

/// One replacement for display
#[derive(Serialize, Clone)]
pub struct ChangeRow {
    pub file: String,
    pub primary: String,
    pub fallback: String,
    pub occurrences: usize,
}

impl TableDisplay for ChangeRow {
    fn headers() -> Vec<&'static str> {
        vec!["File", "Primary", "Fallback", "Occurrences"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.file.clone(),
            self.primary.clone(),
            self.fallback.clone(),
            self.occurrences.to_string(),
        ]
    }
}

/// One git step for display
#[derive(Serialize, Clone)]
pub struct StepRow {
    pub step: String,
    pub status: String,
    pub detail: String,
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["Step", "Status", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.step.clone(), self.status.clone(), self.detail.clone()]
    }
}

pub async fn execute(args: ApplyArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = args.apply_to(load_config(config_path)?);
    config.validate().context("Invalid configuration")?;
    debug!("Effective configuration: {:?}", config);

    let runner = SystemRunner::new(config.command_timeout());
    let report = Pipeline::new(&config, &runner)
        .run()
        .await
        .context("Self-healing run failed")?;

    if format.is_structured() {
        print_document(&report, format);
    } else {
        print_summary(&report, &config, format);
    }
    Ok(())
}

fn change_rows(report: &PipelineReport, root: &Path) -> Vec<ChangeRow> {
    report
        .changes
        .records
        .iter()
        .flat_map(|record| {
            let file = display_path(root, &record.file);
            record.replacements.iter().map(move |r| ChangeRow {
                file: file.clone(),
                primary: r.primary.clone(),
                fallback: r.fallback.clone(),
                occurrences: r.occurrences,
            })
        })
        .collect()
}

fn step_rows(report: &PipelineReport) -> Vec<StepRow> {
    report
        .git
        .iter()
        .flat_map(|git| git.steps.iter())
        .map(|step| StepRow {
            step: step.name.clone(),
            status: match step.status {
                StepStatus::Succeeded => "ok".to_string(),
                StepStatus::Failed => "failed".to_string(),
                StepStatus::Skipped => "skipped".to_string(),
            },
            detail: step.detail.clone(),
        })
        .collect()
}

fn print_summary(report: &PipelineReport, config: &HealConfig, format: OutputFormat) {
    println!();
    println!("{}", " Selector Healing Report".bold());
    println!("{}", "━".repeat(60).dimmed());

    print_info(&format!(
        "{} learning(s) from {} artifact(s)",
        report.learning_count(),
        report.artifacts_loaded
    ));
    if report.artifacts_skipped > 0 {
        print_warning(&format!(
            "{} malformed artifact(s) skipped",
            report.artifacts_skipped
        ));
    }
    for conflict in &report.conflicts {
        print_warning(&format!(
            "'{}': kept '{}' ({}), dropped '{}' ({})",
            conflict.primary,
            conflict.kept.fallback,
            conflict.kept.source,
            conflict.dropped.fallback,
            conflict.dropped.source
        ));
    }
    for primary in &report.cyclic {
        print_warning(&format!("'{}' left unchanged: learnings form a cycle", primary));
    }

    match report.status {
        PipelineStatus::NoLearnings => {
            print_info("No learnings found; nothing to heal");
            return;
        }
        PipelineStatus::NoSpecFiles => {
            print_info(&format!("No spec files in {}", config.spec_dir.display()));
            return;
        }
        PipelineStatus::NoChanges => {
            print_success("Spec files already use the learned selectors");
            return;
        }
        PipelineStatus::DryRun | PipelineStatus::Applied => {}
    }

    println!();
    print_list(&change_rows(report, &config.spec_dir), format);

    if report.status == PipelineStatus::DryRun {
        print_info(&format!(
            "Dry run: {} file(s) would change, nothing was written",
            report.changes.file_count()
        ));
        return;
    }

    print_success(&format!(
        "Healed {} selector(s) in {} file(s)",
        report.changes.replacement_count(),
        report.changes.file_count()
    ));

    let steps = step_rows(report);
    if !steps.is_empty() {
        println!();
        print_list(&steps, format);
    }
    if let Some(git) = &report.git {
        if let Some(url) = &git.pull_request {
            print_success(&format!("Pull request: {}", url));
        } else if let Some(branch) = &git.branch {
            print_info(&format!("Changes are on branch {}", branch));
        }
        if git.has_failures() {
            print_warning("Some git steps failed; spec files keep their rewritten content");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = HealConfig {
            spec_dir: PathBuf::from("from-file"),
            push: true,
            ..Default::default()
        };
        let args = ApplyArgs {
            dry_run: true,
            spec_dir: Some(PathBuf::from("from-flag")),
            base_branch: Some("main".into()),
            ..Default::default()
        };

        let merged = args.apply_to(config);
        assert!(merged.dry_run);
        assert!(merged.push);
        assert!(!merged.open_pr);
        assert_eq!(merged.spec_dir, PathBuf::from("from-flag"));
        assert_eq!(merged.results_dir, PathBuf::from("test-results"));
        assert_eq!(merged.base_branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_change_rows_use_paths_relative_to_spec_dir() {
        let report: PipelineReport = serde_json::from_str(
            r##"{
                "status": "applied",
                "dry_run": false,
                "artifacts_loaded": 1,
                "artifacts_skipped": 0,
                "learnings": {"#old-btn": "[data-testid=submit]"},
                "conflicts": [],
                "cyclic": [],
                "spec_files_scanned": 1,
                "changes": {"records": [{
                    "file": "tests/e2e/checkout.spec.ts",
                    "replacements": [{"primary": "#old-btn", "fallback": "[data-testid=submit]", "occurrences": 2}]
                }]},
                "git": null
            }"##,
        )
        .unwrap();

        let rows = change_rows(&report, Path::new("tests/e2e"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file, "checkout.spec.ts");
        assert_eq!(rows[0].occurrences, 2);
    }
}
