use tracing::{info, instrument};

use crate::workflow::{in_stage, Stage, StartOutcome, WorkOrder, Worker, WorkflowResult};

impl Worker {
    /// Create `branch`, commit its instructions file, publish the branch and
    /// open a pull request for it.
    ///
    /// Nothing is rolled back on failure: a branch created before a later
    /// step fails stays in place.
    #[instrument(skip(self, instructions))]
    pub async fn start_new(&self, branch: &str, instructions: &str) -> WorkflowResult<StartOutcome> {
        let order = WorkOrder::new(branch, instructions);
        let instructions_path = order.instructions_path();

        in_stage(Stage::CreateBranch, self.git.create_branch(&order.branch)).await?;
        in_stage(
            Stage::WriteInstructions,
            self.git.write_text_file(&instructions_path, &order.instructions),
        )
        .await?;
        in_stage(
            Stage::CommitInstructions,
            self.git.stage_commit_and_push(&order.commit_message()),
        )
        .await?;
        in_stage(Stage::PushBranch, self.git.push_new_branch_upstream(&order.branch)).await?;

        let title = order.title();
        in_stage(
            Stage::OpenPullRequest,
            self.hosting.open_pull_request(&title, &order.description()),
        )
        .await?;

        info!(path = %instructions_path, title = %title, "Started new branch");
        Ok(StartOutcome {
            branch: order.branch,
            instructions_path,
            title,
        })
    }
}
