use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::error::{AppError, Result};
use crate::exec::{command_line, RunContext};
use crate::workflow::branch::resolve_branch;
use crate::workflow::prompt::build_prompt;
use crate::workflow::report::{CheckResult, ResultReport};
use crate::workflow::types::{split_command, PullRequestContext};
use crate::workflow::{
    in_stage, ProcessOutcome, Stage, Worker, WorkflowError, WorkflowResult,
    AUTOMATED_COMMIT_MESSAGE,
};

impl Worker {
    /// Run the agent against an existing pull request, then lint, test,
    /// report and commit.
    ///
    /// Lint and test failures end up in the report; every other failure
    /// aborts the run at its stage. A worktree created before a later
    /// failure is left for the next run to reuse.
    #[instrument(skip(self), fields(pr = pr_number))]
    pub async fn process_existing(&self, pr_number: u64) -> WorkflowResult<ProcessOutcome> {
        // One deadline for the whole run, not one per step.
        let ctx = RunContext::with_cancellation(self.cancel.child_token())
            .with_timeout(self.config.timeout);

        let pr_info = in_stage(Stage::Fetch, self.hosting.fetch_pull_request(pr_number)).await?;
        let branch = in_stage(Stage::ResolveBranch, async { resolve_branch(&pr_info) }).await?;
        let pr = PullRequestContext {
            number: pr_number,
            info: pr_info,
            branch,
        };
        info!(branch = %pr.branch, "Processing pull request");

        let worktree = in_stage(Stage::PrepareWorktree, self.prepare_worktree(&pr.branch)).await?;

        let prompt = build_prompt(&self.config.instructions, &pr.info);
        in_stage(Stage::RunAgent, self.run_agent(&ctx, &prompt)).await?;

        let lint = self.run_check(&ctx, Stage::RunLint, "Lint", &self.config.lint).await?;
        let test = self.run_check(&ctx, Stage::RunTest, "Test", &self.config.test).await?;
        let (lint_passed, test_passed) = (lint.passed, test.passed);

        let body = ResultReport::new(pr.branch.clone(), vec![lint, test]).render();
        in_stage(Stage::PostReport, self.hosting.post_comment(pr.number, &body)).await?;

        let committed = in_stage(
            Stage::CommitAndPush,
            self.git.stage_commit_and_push(AUTOMATED_COMMIT_MESSAGE),
        )
        .await?;

        info!(
            branch = %pr.branch,
            lint_passed,
            test_passed,
            committed,
            "Pull request processed"
        );
        Ok(ProcessOutcome {
            pr_number: pr.number,
            branch: pr.branch,
            worktree,
            lint_passed,
            test_passed,
            committed,
        })
    }

    /// Reuse the branch's worktree or create it, then move into it.
    async fn prepare_worktree(&self, branch: &str) -> Result<PathBuf> {
        if self.git.worktree_exists(branch).await? {
            info!(branch, "Reusing existing worktree");
        } else {
            let path = self.git.worktree_path(branch).await?;
            self.git.create_worktree(branch, &path).await?;
        }

        let path = self.git.worktree_path(branch).await?;
        self.git.change_working_directory(&path).await?;
        Ok(path)
    }

    async fn run_agent(&self, ctx: &RunContext, prompt: &str) -> Result<()> {
        let (program, args) = split_command(&self.config.agent);
        info!(command = %command_line(program, args), "Running agent");
        self.runner
            .run_with_input(ctx, prompt, program, args)
            .await
            .map_err(AppError::from)
    }

    /// Run lint or test. An ordinary failure is data for the report; only
    /// an elapsed deadline or cancellation aborts the run.
    async fn run_check(
        &self,
        ctx: &RunContext,
        stage: Stage,
        name: &str,
        argv: &[String],
    ) -> WorkflowResult<CheckResult> {
        let (program, args) = split_command(argv);
        let command = command_line(program, args);
        info!(check = name, command = %command, "Running check");

        let mut result = self.runner.run_captured(ctx, program, args).await;
        if result.failure.as_ref().is_some_and(|e| e.is_interruption()) {
            if let Some(failure) = result.failure.take() {
                warn!(check = name, error = %failure, "Check interrupted");
                return Err(WorkflowError::new(stage, AppError::Execution(failure)));
            }
        }

        if let Some(failure) = &result.failure {
            warn!(check = name, error = %failure, "Check failed");
        }
        Ok(CheckResult::from_execution(name, command, &result))
    }
}
