//! Proposing rewritten specs through git and an optional PR CLI
//!
//! Every step is fault tolerant: a failed command is logged and recorded in
//! the [`GitOutcome`], and the remaining steps that depend on it are skipped.
//! Files on disk are never rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, info};

use crate::config::HealConfig;
use crate::error::{HealError, HealResult};
use crate::report::ChangeSet;

pub const GIT: &str = "git";
pub const PR_CLI: &str = "gh";

/// Captured result of one external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Process boundary for git and the PR CLI, stubbed in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> HealResult<CommandOutput>;

    /// Whether `program` can be executed at all
    async fn is_available(&self, program: &str) -> bool;
}

/// Runs each command in its own child process with an upper time bound
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> HealResult<CommandOutput> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Running: {}", command_line);

        let child = TokioCommand::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        // Dropping the future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| HealError::CommandTimeout {
                command: command_line.clone(),
                seconds: self.timeout.as_secs(),
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn is_available(&self, program: &str) -> bool {
        let probe = TokioCommand::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        matches!(
            tokio::time::timeout(self.timeout, probe).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

/// Branch name for a healing run, e.g. `selfheal/selectors/20261018-153045-123`
pub fn branch_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        now.format("%Y%m%d-%H%M%S-%3f")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One git/PR step as reported to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStep {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitOutcome {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub pushed: bool,
    pub pull_request: Option<String>,
    pub steps: Vec<GitStep>,
}

impl GitOutcome {
    fn succeeded(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!("{}: {}", name, detail);
        self.steps.push(GitStep {
            name: name.to_string(),
            status: StepStatus::Succeeded,
            detail,
        });
    }

    fn failed(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        error!("{} failed: {}", name, detail);
        self.steps.push(GitStep {
            name: name.to_string(),
            status: StepStatus::Failed,
            detail,
        });
    }

    fn skipped(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!("{} skipped: {}", name, detail);
        self.steps.push(GitStep {
            name: name.to_string(),
            status: StepStatus::Skipped,
            detail,
        });
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }
}

/// Turns a change set into a branch, a commit and optionally a PR
pub struct GitAutomation<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    config: &'a HealConfig,
}

impl<'a, R: CommandRunner + ?Sized> GitAutomation<'a, R> {
    pub fn new(runner: &'a R, config: &'a HealConfig) -> Self {
        Self { runner, config }
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, String> {
        self.exec(GIT, args).await
    }

    /// Run a command; a spawn error, timeout or non-zero exit becomes the
    /// command's error text.
    async fn exec(&self, program: &str, args: &[&str]) -> Result<CommandOutput, String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match self.runner.run(program, &args, &self.config.repo_dir).await {
            Ok(output) if output.success => Ok(output),
            Ok(output) => {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout.trim().to_string()
                } else {
                    output.stderr.trim().to_string()
                };
                Err(format!(
                    "exit code {}: {}",
                    output.code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
                    text
                ))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn is_repository(&self) -> bool {
        matches!(
            self.git(&["rev-parse", "--is-inside-work-tree"]).await,
            Ok(output) if output.stdout.trim() == "true"
        )
    }

    /// Propose `changes` on a fresh branch. Never fails; see the outcome.
    pub async fn propose(&self, changes: &ChangeSet, now: DateTime<Utc>) -> GitOutcome {
        let mut outcome = GitOutcome::default();

        if changes.is_empty() {
            outcome.skipped("git", "no changes to propose");
            return outcome;
        }
        if !self.runner.is_available(GIT).await {
            outcome.skipped("git", "git is not installed; leaving changes uncommitted");
            return outcome;
        }
        if !self.is_repository().await {
            outcome.skipped(
                "git",
                format!(
                    "{} is not a git repository; leaving changes uncommitted",
                    self.config.repo_dir.display()
                ),
            );
            return outcome;
        }

        let branch = branch_name(&self.config.branch_prefix, now);
        match self.git(&["checkout", "-b", &branch]).await {
            Ok(_) => {
                outcome.succeeded("branch", format!("created {}", branch));
                outcome.branch = Some(branch.clone());
            }
            Err(e) => {
                outcome.failed("branch", e);
                return outcome;
            }
        }

        if !self.commit(changes, &mut outcome).await {
            return outcome;
        }

        self.publish(changes, &branch, &mut outcome).await;
        outcome
    }

    async fn commit(&self, changes: &ChangeSet, outcome: &mut GitOutcome) -> bool {
        let files: Vec<String> = changes
            .files()
            .map(|f| absolute(f).to_string_lossy().into_owned())
            .collect();
        let paths: Vec<&str> = files.iter().map(String::as_str).collect();

        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(&paths);
        if let Err(e) = self.git(&add).await {
            outcome.failed("stage", e);
            return false;
        }

        // Scoped to the rewritten paths; anything else the operator staged
        // stays out of the healing commit
        let mut staged: Vec<&str> = vec!["diff", "--cached", "--name-only", "--"];
        staged.extend(&paths);
        match self.git(&staged).await {
            Ok(output) if output.stdout.trim().is_empty() => {
                outcome.skipped("commit", "nothing staged");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                outcome.failed("stage", e);
                return false;
            }
        }

        let message = changes.commit_message();
        let mut commit: Vec<&str> = vec!["commit", "-m", &message, "--"];
        commit.extend(&paths);
        if let Err(e) = self.git(&commit).await {
            outcome.failed("commit", e);
            return false;
        }

        let sha = self
            .git(&["rev-parse", "HEAD"])
            .await
            .map(|o| o.stdout.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty());
        outcome.succeeded(
            "commit",
            format!(
                "{} ({} replacement(s))",
                sha.as_deref().unwrap_or("committed"),
                changes.replacement_count()
            ),
        );
        outcome.commit = sha;
        true
    }

    async fn publish(&self, changes: &ChangeSet, branch: &str, outcome: &mut GitOutcome) {
        let pr_cli = if self.config.open_pr {
            self.runner.is_available(PR_CLI).await
        } else {
            false
        };
        if self.config.open_pr && !pr_cli {
            outcome.skipped(
                "pull request",
                format!(
                    "{} CLI not available; push {} and open a pull request manually",
                    PR_CLI, branch
                ),
            );
        }

        if !(self.config.push || pr_cli) {
            return;
        }

        let remote = self.config.remote.as_str();
        match self.git(&["push", "-u", remote, branch]).await {
            Ok(_) => {
                outcome.succeeded("push", format!("pushed {} to {}", branch, remote));
                outcome.pushed = true;
            }
            Err(e) => {
                outcome.failed("push", e);
                if pr_cli {
                    outcome.skipped("pull request", "branch is not on the remote");
                }
                return;
            }
        }

        if !pr_cli {
            return;
        }

        let title = changes.commit_subject();
        let body = changes.commit_body();
        let mut args: Vec<&str> = vec![
            "pr",
            "create",
            "--title",
            title.as_str(),
            "--body",
            body.as_str(),
            "--head",
            branch,
        ];
        if let Some(base) = self.config.base_branch.as_deref() {
            args.extend(["--base", base]);
        }
        match self.exec(PR_CLI, &args).await {
            Ok(output) => {
                let url = output.stdout.trim().to_string();
                outcome.succeeded("pull request", format!("opened {}", url));
                outcome.pull_request = Some(url);
            }
            Err(e) => outcome.failed("pull request", e),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
