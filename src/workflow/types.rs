use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::{AppError, Result};

/// Every named step of both workflows, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    ResolveBranch,
    PrepareWorktree,
    RunAgent,
    RunLint,
    RunTest,
    PostReport,
    CommitAndPush,
    CreateBranch,
    WriteInstructions,
    CommitInstructions,
    PushBranch,
    OpenPullRequest,
}

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    BranchResolution,
    Worktree,
    AgentExecution,
    CheckExecution,
    Reporting,
    Commit,
    Push,
    BranchCreation,
    FileWrite,
    PullRequestCreation,
}

impl Stage {
    pub fn kind(self) -> ErrorKind {
        match self {
            Stage::Fetch => ErrorKind::Fetch,
            Stage::ResolveBranch => ErrorKind::BranchResolution,
            Stage::PrepareWorktree => ErrorKind::Worktree,
            Stage::RunAgent => ErrorKind::AgentExecution,
            Stage::RunLint | Stage::RunTest => ErrorKind::CheckExecution,
            Stage::PostReport => ErrorKind::Reporting,
            Stage::CommitAndPush | Stage::CommitInstructions => ErrorKind::Commit,
            Stage::PushBranch => ErrorKind::Push,
            Stage::CreateBranch => ErrorKind::BranchCreation,
            Stage::WriteInstructions => ErrorKind::FileWrite,
            Stage::OpenPullRequest => ErrorKind::PullRequestCreation,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::ResolveBranch => "resolve-branch",
            Stage::PrepareWorktree => "prepare-worktree",
            Stage::RunAgent => "run-agent",
            Stage::RunLint => "run-lint",
            Stage::RunTest => "run-test",
            Stage::PostReport => "post-report",
            Stage::CommitAndPush => "commit-and-push",
            Stage::CreateBranch => "create-branch",
            Stage::WriteInstructions => "write-instructions",
            Stage::CommitInstructions => "commit-instructions",
            Stage::PushBranch => "push-branch",
            Stage::OpenPullRequest => "open-pull-request",
        }
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            Stage::Fetch => "failed to fetch pull request",
            Stage::ResolveBranch => "failed to resolve pull request branch",
            Stage::PrepareWorktree => "failed to prepare worktree",
            Stage::RunAgent => "agent execution failed",
            Stage::RunLint => "lint execution interrupted",
            Stage::RunTest => "test execution interrupted",
            Stage::PostReport => "failed to post report comment",
            Stage::CommitAndPush => "failed to commit and push changes",
            Stage::CreateBranch => "failed to create branch",
            Stage::WriteInstructions => "failed to write instructions file",
            Stage::CommitInstructions => "failed to commit instructions file",
            Stage::PushBranch => "failed to push branch upstream",
            Stage::OpenPullRequest => "failed to create pull request",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A workflow aborted at `stage` because of `source`.
#[derive(Debug, Error)]
#[error("{}: {source}", .stage.failure_message())]
pub struct WorkflowError {
    pub stage: Stage,
    #[source]
    pub source: AppError,
}

impl WorkflowError {
    pub fn new(stage: Stage, source: AppError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.stage.kind()
    }

    /// The shared deadline elapsed while this stage was running.
    pub fn is_timeout(&self) -> bool {
        matches!(&self.source, AppError::Execution(e) if e.is_timeout())
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_interruption() && !self.is_timeout()
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Immutable settings for one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub agent: Vec<String>,
    pub lint: Vec<String>,
    pub test: Vec<String>,
    /// Preamble placed before the pull-request payload in the agent prompt.
    pub instructions: String,
    /// Single budget shared by the agent, lint and test steps.
    pub timeout: Duration,
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, argv) in [("agent", &self.agent), ("lint", &self.lint), ("test", &self.test)] {
            if argv.first().map_or(true, |program| program.trim().is_empty()) {
                return Err(AppError::Config(format!("{name} command must not be empty")));
            }
        }
        if self.timeout.is_zero() {
            return Err(AppError::Config("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Split a validated argv into program and arguments.
pub(crate) fn split_command(argv: &[String]) -> (&str, &[String]) {
    match argv.split_first() {
        Some((program, args)) => (program.as_str(), args),
        None => ("", &[]),
    }
}

/// Pull request being processed: raw hosting-service payload plus its branch.
#[derive(Debug, Clone)]
pub struct PullRequestContext {
    pub number: u64,
    pub info: String,
    pub branch: String,
}

/// Request to start new work on a fresh branch.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub branch: String,
    pub instructions: String,
}

impl WorkOrder {
    pub fn new(branch: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            instructions: instructions.into(),
        }
    }

    /// `docs/<branch>-instructions.md`; a `/` in the branch nests directories.
    pub fn instructions_path(&self) -> String {
        format!("docs/{}-instructions.md", self.branch)
    }

    pub fn status_path(&self) -> String {
        format!("docs/{}-implementation-status.md", self.branch)
    }

    pub fn commit_message(&self) -> String {
        format!("Add instructions for {}", self.branch)
    }

    pub fn title(&self) -> String {
        format!("Implement {}", self.branch)
    }

    pub fn description(&self) -> String {
        format!(
            "Study {} and make a list of necessary implementation steps in {}",
            self.instructions_path(),
            self.status_path()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub pr_number: u64,
    pub branch: String,
    pub worktree: PathBuf,
    pub lint_passed: bool,
    pub test_passed: bool,
    /// False when the agent left no changes behind.
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub branch: String,
    pub instructions_path: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecutionError;

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            agent: vec!["amp".to_string(), "--stdin".to_string()],
            lint: vec!["go".to_string(), "fmt".to_string()],
            test: vec!["go".to_string(), "test".to_string()],
            instructions: "Review".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_work_order_derivations() {
        let order = WorkOrder::new("feature/x", "do thing");
        assert_eq!(order.instructions_path(), "docs/feature/x-instructions.md");
        assert_eq!(order.commit_message(), "Add instructions for feature/x");
        assert_eq!(order.title(), "Implement feature/x");
        let description = order.description();
        assert!(description.contains("docs/feature/x-instructions.md"));
        assert!(description.contains("docs/feature/x-implementation-status.md"));
    }

    #[test]
    fn test_workflow_error_display_names_stage_and_cause() {
        let err = WorkflowError::new(
            Stage::CreateBranch,
            AppError::git("checkout -b", "a branch named 'x' already exists"),
        );
        assert_eq!(
            err.to_string(),
            "failed to create branch: git checkout -b failed: a branch named 'x' already exists"
        );
        assert_eq!(err.kind(), ErrorKind::BranchCreation);
    }

    #[test]
    fn test_workflow_error_timeout_classification() {
        let err = WorkflowError::new(
            Stage::RunAgent,
            AppError::Execution(ExecutionError::TimedOut {
                program: "amp".to_string(),
                after: Duration::from_secs(1),
            }),
        );
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::AgentExecution);

        let cancelled = WorkflowError::new(
            Stage::RunTest,
            AppError::Execution(ExecutionError::Cancelled {
                program: "go".to_string(),
            }),
        );
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.kind(), ErrorKind::CheckExecution);
    }

    #[test]
    fn test_stage_kinds_for_commit_and_push() {
        assert_eq!(Stage::CommitAndPush.kind(), ErrorKind::Commit);
        assert_eq!(Stage::CommitInstructions.kind(), ErrorKind::Commit);
        assert_eq!(Stage::PushBranch.kind(), ErrorKind::Push);
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut empty_lint = config();
        empty_lint.lint.clear();
        assert!(empty_lint.validate().is_err());

        let mut zero = config();
        zero.timeout = Duration::ZERO;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_split_command() {
        let argv = vec!["go".to_string(), "test".to_string(), "./...".to_string()];
        let (program, args) = split_command(&argv);
        assert_eq!(program, "go");
        assert_eq!(args, &argv[1..]);
    }
}
