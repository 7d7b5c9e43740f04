use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kratt::test_support::{workflow_config, Call, Fakes, Script};
use kratt::workflow::report::{FAILED_MARKER, PASSED_MARKER};
use kratt::workflow::{ErrorKind, Stage, AUTOMATED_COMMIT_MESSAGE};

fn fakes_with_pr(number: u64, branch: &str) -> Fakes {
    let fakes = Fakes::new();
    fakes.hosting.add_pull_request_for_branch(number, branch);
    fakes
}

#[tokio::test]
async fn test_full_run_follows_stage_order() {
    let fakes = fakes_with_pr(42, "fix-login");
    fakes.git.set_pending_changes(true);
    let worker = fakes.worker(workflow_config());

    let outcome = worker.process_existing(42).await.unwrap();

    let expected_worktree = PathBuf::from("/work/widgets-fix-login");
    assert_eq!(outcome.branch, "fix-login");
    assert_eq!(outcome.worktree, expected_worktree);
    assert!(outcome.lint_passed && outcome.test_passed && outcome.committed);

    assert_eq!(
        fakes.log.ops(),
        vec![
            "fetch_pull_request",
            "worktree_exists",
            "worktree_path",
            "create_worktree",
            "worktree_path",
            "change_working_directory",
            "run_with_input",
            "run_captured",
            "run_captured",
            "post_comment",
            "stage_commit_and_push",
        ]
    );
    assert_eq!(fakes.git.current_dir(), expected_worktree);
    assert_eq!(fakes.git.commits(), vec![AUTOMATED_COMMIT_MESSAGE.to_string()]);
}

#[tokio::test]
async fn test_existing_worktree_is_reused() {
    let fakes = fakes_with_pr(7, "feature/auth");
    fakes.git.add_worktree("feature/auth", "/elsewhere/auth");
    let worker = fakes.worker(workflow_config());

    let outcome = worker.process_existing(7).await.unwrap();

    assert_eq!(fakes.log.count("create_worktree"), 0);
    assert_eq!(outcome.worktree, PathBuf::from("/elsewhere/auth"));
    assert_eq!(fakes.git.current_dir(), PathBuf::from("/elsewhere/auth"));
}

#[tokio::test]
async fn test_existence_check_precedes_single_creation() {
    let fakes = fakes_with_pr(3, "feature/auth");
    let worker = fakes.worker(workflow_config());

    worker.process_existing(3).await.unwrap();

    let check = fakes.log.position("worktree_exists").unwrap();
    let create = fakes.log.position("create_worktree").unwrap();
    assert!(check < create);
    assert_eq!(fakes.log.count("create_worktree"), 1);
    assert!(fakes.log.calls().contains(&Call::CreateWorktree {
        branch: "feature/auth".to_string(),
        path: PathBuf::from("/work/widgets-feature-auth-fc659bd7"),
    }));
}

#[tokio::test]
async fn test_prompt_wraps_pull_request_payload() {
    let fakes = Fakes::new();
    fakes
        .hosting
        .add_pull_request(5, r#"{"number": 5, "headRefName": "tweak"}"#);
    let worker = fakes.worker(workflow_config());

    worker.process_existing(5).await.unwrap();

    let input = fakes
        .log
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::RunWithInput { command, input } => {
                assert_eq!(command, "agent --stdin");
                Some(input)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(
        input,
        "Review the pull request.\n\n<pull-request>\n{\"number\": 5, \"headRefName\": \"tweak\"}\n</pull-request>\n"
    );
}

#[tokio::test]
async fn test_agent_failure_skips_checks_report_and_commit() {
    let fakes = fakes_with_pr(9, "fix");
    fakes.runner.script(
        "agent --stdin",
        Script::Fail {
            output: String::new(),
            code: 2,
        },
    );
    fakes.git.set_pending_changes(true);
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(9).await.unwrap_err();

    assert_eq!(err.stage, Stage::RunAgent);
    assert_eq!(err.kind(), ErrorKind::AgentExecution);
    assert!(!err.is_timeout());
    assert_eq!(fakes.log.count("run_captured"), 0);
    assert_eq!(fakes.log.count("post_comment"), 0);
    assert_eq!(fakes.log.count("stage_commit_and_push"), 0);
}

#[tokio::test]
async fn test_lint_failure_is_reported_and_still_committed() {
    let fakes = fakes_with_pr(11, "fix");
    fakes.runner.script(
        "lint",
        Script::Fail {
            output: "main.go:12: formatting differs".to_string(),
            code: 1,
        },
    );
    fakes
        .runner
        .script("test", Script::Succeed("ok  widgets 0.2s".to_string()));
    fakes.git.set_pending_changes(true);
    let worker = fakes.worker(workflow_config());

    let outcome = worker.process_existing(11).await.unwrap();

    assert!(!outcome.lint_passed);
    assert!(outcome.test_passed);
    assert!(outcome.committed);

    let comments = fakes.hosting.comments();
    assert_eq!(comments.len(), 1);
    let (number, body) = &comments[0];
    assert_eq!(*number, 11);
    assert!(body.contains(FAILED_MARKER));
    assert!(body.contains(PASSED_MARKER));
    assert!(body.contains("main.go:12: formatting differs"));
    assert!(body.contains("ok  widgets 0.2s"));

    let comment = fakes.log.position("post_comment").unwrap();
    let commit = fakes.log.position("stage_commit_and_push").unwrap();
    assert!(comment < commit);
}

#[tokio::test]
async fn test_test_failure_is_reported() {
    let fakes = fakes_with_pr(12, "fix");
    fakes.runner.script(
        "test",
        Script::Fail {
            output: "--- FAIL: TestLogin".to_string(),
            code: 1,
        },
    );
    let worker = fakes.worker(workflow_config());

    let outcome = worker.process_existing(12).await.unwrap();

    assert!(outcome.lint_passed);
    assert!(!outcome.test_passed);
    let body = &fakes.hosting.comments()[0].1;
    assert!(body.contains("### Lint\n\n✅ Passed"));
    assert!(body.contains("### Test\n\n❌ Failed"));
}

#[tokio::test]
async fn test_no_changes_is_not_an_error() {
    let fakes = fakes_with_pr(13, "fix");
    let worker = fakes.worker(workflow_config());

    let outcome = worker.process_existing(13).await.unwrap();

    assert!(!outcome.committed);
    assert_eq!(fakes.log.count("stage_commit_and_push"), 1);
    assert!(fakes.git.commits().is_empty());
}

#[tokio::test]
async fn test_report_failure_blocks_commit() {
    let fakes = fakes_with_pr(14, "fix");
    fakes.hosting.fail_on("post_comment");
    fakes.git.set_pending_changes(true);
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(14).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Reporting);
    assert_eq!(fakes.log.count("stage_commit_and_push"), 0);
    assert!(fakes.git.commits().is_empty());
}

#[tokio::test]
async fn test_commit_failure_is_reported_as_commit_stage() {
    let fakes = fakes_with_pr(15, "fix");
    fakes.git.fail_on("stage_commit_and_push");
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(15).await.unwrap_err();

    assert_eq!(err.stage, Stage::CommitAndPush);
    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(fakes.hosting.comments().len(), 1);
}

#[tokio::test]
async fn test_unknown_pull_request_mutates_nothing() {
    let fakes = Fakes::new();
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(404).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(err.to_string().starts_with("failed to fetch pull request: "));
    assert_eq!(fakes.log.ops(), vec!["fetch_pull_request"]);
}

#[tokio::test]
async fn test_missing_branch_mutates_nothing() {
    let fakes = Fakes::new();
    fakes
        .hosting
        .add_pull_request(8, r#"{"number": 8, "title": "No branch here"}"#);
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(8).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BranchResolution);
    assert_eq!(fakes.log.ops(), vec!["fetch_pull_request"]);
}

#[tokio::test]
async fn test_worktree_failure_aborts_before_agent() {
    let fakes = fakes_with_pr(16, "fix");
    fakes.git.fail_on("create_worktree");
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(16).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Worktree);
    assert_eq!(fakes.log.count("run_with_input"), 0);
    assert_eq!(fakes.log.count("change_working_directory"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_agent_times_out_at_deadline() {
    let fakes = fakes_with_pr(17, "fix");
    fakes.runner.script("agent --stdin", Script::Hang);
    let mut config = workflow_config();
    config.timeout = Duration::from_secs(30);
    let worker = fakes.worker(config);

    let started = tokio::time::Instant::now();
    let err = worker.process_existing(17).await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert_eq!(err.kind(), ErrorKind::AgentExecution);
    assert!(started.elapsed() <= Duration::from_secs(31));
    assert_eq!(fakes.log.count("post_comment"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_shared_across_steps() {
    let fakes = fakes_with_pr(18, "fix");
    // The agent uses most of the budget, leaving lint to hit the deadline.
    fakes
        .runner
        .script("agent --stdin", Script::Delay(Duration::from_secs(50)));
    fakes.runner.script("lint", Script::Delay(Duration::from_secs(20)));
    let worker = fakes.worker(workflow_config());

    let err = worker.process_existing(18).await.unwrap_err();

    assert_eq!(err.stage, Stage::RunLint);
    assert!(err.is_timeout());
    assert_eq!(fakes.log.count("post_comment"), 0);
    assert_eq!(fakes.log.count("stage_commit_and_push"), 0);
}

#[tokio::test]
async fn test_cancellation_stops_hanging_agent() {
    let fakes = fakes_with_pr(19, "fix");
    fakes.runner.script("agent --stdin", Script::Hang);
    let token = CancellationToken::new();
    let worker = fakes.worker(workflow_config()).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let err = tokio::time::timeout(Duration::from_secs(5), worker.process_existing(19))
        .await
        .expect("cancellation should end the run")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled());
    assert_eq!(err.stage, Stage::RunAgent);
}
