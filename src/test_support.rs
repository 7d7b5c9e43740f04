//! In-memory stand-ins for the engine's three capabilities.
//!
//! Every fake appends to one shared [`CallLog`], so tests can assert the
//! order of calls across capabilities, and every fake can be told to fail
//! a named operation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::exec::{
    command_line, CommandRunner, ExecutionError, ExecutionResult, RunContext,
};
use crate::platform::HostingService;
use crate::workflow::{WorkflowConfig, Worker};
use crate::workspace::{worktree_path_for, RepoSlug, VersionControl};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    IsRepository,
    RepositoryOwnerAndName,
    WorktreeExists(String),
    CreateWorktree { branch: String, path: PathBuf },
    WorktreePath(String),
    ChangeWorkingDirectory(PathBuf),
    StageCommitAndPush(String),
    BranchExists(String),
    CreateBranch(String),
    WriteTextFile { path: String, content: String },
    PushNewBranchUpstream(String),
    FetchPullRequest(u64),
    PostComment { number: u64, body: String },
    OpenPullRequest { title: String, description: String },
    RunWithInput { command: String, input: String },
    RunCaptured { command: String },
}

impl Call {
    /// Operation name used by `fail_on`.
    pub fn op(&self) -> &'static str {
        match self {
            Call::IsRepository => "is_repository",
            Call::RepositoryOwnerAndName => "repository_owner_and_name",
            Call::WorktreeExists(_) => "worktree_exists",
            Call::CreateWorktree { .. } => "create_worktree",
            Call::WorktreePath(_) => "worktree_path",
            Call::ChangeWorkingDirectory(_) => "change_working_directory",
            Call::StageCommitAndPush(_) => "stage_commit_and_push",
            Call::BranchExists(_) => "branch_exists",
            Call::CreateBranch(_) => "create_branch",
            Call::WriteTextFile { .. } => "write_text_file",
            Call::PushNewBranchUpstream(_) => "push_new_branch_upstream",
            Call::FetchPullRequest(_) => "fetch_pull_request",
            Call::PostComment { .. } => "post_comment",
            Call::OpenPullRequest { .. } => "open_pull_request",
            Call::RunWithInput { .. } => "run_with_input",
            Call::RunCaptured { .. } => "run_captured",
        }
    }
}

/// Ordered record of calls shared by all fakes.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn record(&self, call: Call) {
        lock(&self.0).push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.0).clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        lock(&self.0).iter().map(Call::op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        lock(&self.0).iter().filter(|c| c.op() == op).count()
    }

    /// Index of the first call to `op`.
    pub fn position(&self, op: &str) -> Option<usize> {
        lock(&self.0).iter().position(|c| c.op() == op)
    }
}

#[derive(Debug, Default)]
struct FailPoints(Mutex<HashSet<&'static str>>);

impl FailPoints {
    fn set(&self, op: &'static str) {
        lock(&self.0).insert(op);
    }

    fn hit(&self, op: &str) -> bool {
        lock(&self.0).contains(op)
    }
}

#[derive(Debug)]
struct RepoState {
    is_repository: bool,
    slug: Option<RepoSlug>,
    root: PathBuf,
    current_dir: PathBuf,
    branches: HashSet<String>,
    worktrees: HashMap<String, PathBuf>,
    files: HashMap<String, String>,
    pending_changes: bool,
    commits: Vec<String>,
    published: Vec<String>,
}

/// In-memory repository rooted at `/work/widgets` with an `acme/widgets` origin.
#[derive(Debug)]
pub struct FakeVersionControl {
    log: CallLog,
    fail: FailPoints,
    state: Mutex<RepoState>,
}

impl FakeVersionControl {
    pub fn new(log: CallLog) -> Self {
        let root = PathBuf::from("/work/widgets");
        Self {
            log,
            fail: FailPoints::default(),
            state: Mutex::new(RepoState {
                is_repository: true,
                slug: Some(RepoSlug::new("acme", "widgets")),
                current_dir: root.clone(),
                root,
                branches: HashSet::from(["main".to_string()]),
                worktrees: HashMap::new(),
                files: HashMap::new(),
                pending_changes: false,
                commits: Vec::new(),
                published: Vec::new(),
            }),
        }
    }

    pub fn fail_on(&self, op: &'static str) {
        self.fail.set(op);
    }

    pub fn set_is_repository(&self, is_repository: bool) {
        lock(&self.state).is_repository = is_repository;
    }

    pub fn set_remote(&self, slug: Option<RepoSlug>) {
        lock(&self.state).slug = slug;
    }

    pub fn add_branch(&self, branch: &str) {
        lock(&self.state).branches.insert(branch.to_string());
    }

    pub fn add_worktree(&self, branch: &str, path: impl Into<PathBuf>) {
        lock(&self.state).worktrees.insert(branch.to_string(), path.into());
    }

    /// Pretend something (usually the agent) modified the working tree.
    pub fn set_pending_changes(&self, pending: bool) {
        lock(&self.state).pending_changes = pending;
    }

    pub fn root(&self) -> PathBuf {
        lock(&self.state).root.clone()
    }

    pub fn current_dir(&self) -> PathBuf {
        lock(&self.state).current_dir.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    pub fn commits(&self) -> Vec<String> {
        lock(&self.state).commits.clone()
    }

    pub fn published(&self) -> Vec<String> {
        lock(&self.state).published.clone()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        lock(&self.state).branches.contains(branch)
    }

    fn enter(&self, call: Call) -> Result<()> {
        let op = call.op();
        self.log.record(call);
        if self.fail.hit(op) {
            return Err(AppError::git(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionControl for FakeVersionControl {
    async fn is_repository(&self) -> Result<bool> {
        self.enter(Call::IsRepository)?;
        Ok(lock(&self.state).is_repository)
    }

    async fn repository_owner_and_name(&self) -> Result<RepoSlug> {
        self.enter(Call::RepositoryOwnerAndName)?;
        lock(&self.state)
            .slug
            .clone()
            .ok_or_else(|| AppError::git("remote get-url origin", "no origin remote"))
    }

    async fn worktree_exists(&self, branch: &str) -> Result<bool> {
        self.enter(Call::WorktreeExists(branch.to_string()))?;
        Ok(lock(&self.state).worktrees.contains_key(branch))
    }

    async fn create_worktree(&self, branch: &str, path: &Path) -> Result<()> {
        self.enter(Call::CreateWorktree {
            branch: branch.to_string(),
            path: path.to_path_buf(),
        })?;
        let mut state = lock(&self.state);
        if state.worktrees.contains_key(branch) {
            return Err(AppError::git("worktree add", format!("'{branch}' is already checked out")));
        }
        state.branches.insert(branch.to_string());
        state.worktrees.insert(branch.to_string(), path.to_path_buf());
        Ok(())
    }

    async fn worktree_path(&self, branch: &str) -> Result<PathBuf> {
        self.enter(Call::WorktreePath(branch.to_string()))?;
        let state = lock(&self.state);
        match state.worktrees.get(branch) {
            Some(path) => Ok(path.clone()),
            None => worktree_path_for(&state.root, branch),
        }
    }

    async fn change_working_directory(&self, path: &Path) -> Result<()> {
        self.enter(Call::ChangeWorkingDirectory(path.to_path_buf()))?;
        lock(&self.state).current_dir = path.to_path_buf();
        Ok(())
    }

    async fn stage_commit_and_push(&self, message: &str) -> Result<bool> {
        self.enter(Call::StageCommitAndPush(message.to_string()))?;
        let mut state = lock(&self.state);
        if !state.pending_changes {
            return Ok(false);
        }
        state.pending_changes = false;
        state.commits.push(message.to_string());
        Ok(true)
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.enter(Call::BranchExists(branch.to_string()))?;
        Ok(lock(&self.state).branches.contains(branch))
    }

    async fn create_branch(&self, branch: &str) -> Result<()> {
        self.enter(Call::CreateBranch(branch.to_string()))?;
        let mut state = lock(&self.state);
        if !state.branches.insert(branch.to_string()) {
            return Err(AppError::git(
                "checkout -b",
                format!("a branch named '{branch}' already exists"),
            ));
        }
        Ok(())
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<()> {
        self.enter(Call::WriteTextFile {
            path: path.to_string(),
            content: content.to_string(),
        })?;
        let mut state = lock(&self.state);
        state.files.insert(path.to_string(), content.to_string());
        state.pending_changes = true;
        Ok(())
    }

    async fn push_new_branch_upstream(&self, branch: &str) -> Result<()> {
        self.enter(Call::PushNewBranchUpstream(branch.to_string()))?;
        lock(&self.state).published.push(branch.to_string());
        Ok(())
    }
}

/// In-memory hosting service holding pull-request payloads by number.
#[derive(Debug)]
pub struct FakeHostingService {
    log: CallLog,
    fail: FailPoints,
    pull_requests: Mutex<HashMap<u64, String>>,
    comments: Mutex<Vec<(u64, String)>>,
    opened: Mutex<Vec<(String, String)>>,
}

impl FakeHostingService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: FailPoints::default(),
            pull_requests: Mutex::new(HashMap::new()),
            comments: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, op: &'static str) {
        self.fail.set(op);
    }

    pub fn add_pull_request(&self, number: u64, info: impl Into<String>) {
        lock(&self.pull_requests).insert(number, info.into());
    }

    /// Payload shaped like the GitHub adapter's output.
    pub fn add_pull_request_for_branch(&self, number: u64, branch: &str) {
        let info = serde_json::json!({
            "number": number,
            "title": format!("PR {number}"),
            "body": "Please fix the thing.",
            "headRefName": branch,
            "baseRefName": "main",
            "url": format!("https://github.com/acme/widgets/pull/{number}"),
            "comments": [],
        });
        self.add_pull_request(number, info.to_string());
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        lock(&self.comments).clone()
    }

    pub fn opened(&self) -> Vec<(String, String)> {
        lock(&self.opened).clone()
    }

    fn enter(&self, call: Call) -> Result<()> {
        let op = call.op();
        self.log.record(call);
        if self.fail.hit(op) {
            return Err(AppError::GitHubApi(format!("{op}: injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl HostingService for FakeHostingService {
    async fn fetch_pull_request(&self, number: u64) -> Result<String> {
        self.enter(Call::FetchPullRequest(number))?;
        lock(&self.pull_requests)
            .get(&number)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("pull request #{number}")))
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        self.enter(Call::PostComment {
            number,
            body: body.to_string(),
        })?;
        lock(&self.comments).push((number, body.to_string()));
        Ok(())
    }

    async fn open_pull_request(&self, title: &str, description: &str) -> Result<()> {
        self.enter(Call::OpenPullRequest {
            title: title.to_string(),
            description: description.to_string(),
        })?;
        lock(&self.opened).push((title.to_string(), description.to_string()));
        Ok(())
    }
}

/// Scripted behavior for one command line.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(String),
    Fail { output: String, code: i32 },
    /// Never exits on its own; only the run context ends it.
    Hang,
    /// Exit successfully after a delay, still bounded by the run context.
    Delay(Duration),
}

/// Command runner answering from a script keyed by full command line.
/// Unscripted commands succeed with no output.
#[derive(Debug)]
pub struct FakeCommandRunner {
    log: CallLog,
    scripts: Mutex<HashMap<String, Script>>,
}

impl FakeCommandRunner {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            scripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(&self, command: &str, script: Script) {
        lock(&self.scripts).insert(command.to_string(), script);
    }

    fn lookup(&self, command: &str) -> Script {
        lock(&self.scripts)
            .get(command)
            .cloned()
            .unwrap_or_else(|| Script::Succeed(String::new()))
    }

    async fn play(&self, ctx: &RunContext, program: &str, script: Script) -> ExecutionResult {
        let interrupted =
            |reason| ExecutionError::interrupted(program, reason, ctx.elapsed());
        if let Some(reason) = ctx.interruption() {
            return ExecutionResult::failed(Vec::new(), interrupted(reason));
        }
        match script {
            Script::Succeed(output) => ExecutionResult::success(output.into_bytes()),
            Script::Fail { output, code } => ExecutionResult::failed(
                output.into_bytes(),
                ExecutionError::NonZeroExit {
                    program: program.to_string(),
                    code: Some(code),
                },
            ),
            Script::Hang => {
                let reason = ctx.done().await;
                ExecutionResult::failed(Vec::new(), interrupted(reason))
            }
            Script::Delay(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => ExecutionResult::success(Vec::new()),
                    reason = ctx.done() => ExecutionResult::failed(Vec::new(), interrupted(reason)),
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run_with_input(
        &self,
        ctx: &RunContext,
        input: &str,
        program: &str,
        args: &[String],
    ) -> std::result::Result<(), ExecutionError> {
        let command = command_line(program, args);
        self.log.record(Call::RunWithInput {
            command: command.clone(),
            input: input.to_string(),
        });
        let script = self.lookup(&command);
        match self.play(ctx, program, script).await.failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn run_captured(
        &self,
        ctx: &RunContext,
        program: &str,
        args: &[String],
    ) -> ExecutionResult {
        let command = command_line(program, args);
        self.log.record(Call::RunCaptured {
            command: command.clone(),
        });
        let script = self.lookup(&command);
        self.play(ctx, program, script).await
    }
}

/// Config used by engine tests: `agent --stdin`, `lint`, `test`, one minute.
pub fn workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        agent: vec!["agent".to_string(), "--stdin".to_string()],
        lint: vec!["lint".to_string()],
        test: vec!["test".to_string()],
        instructions: "Review the pull request.".to_string(),
        timeout: Duration::from_secs(60),
    }
}

/// All three fakes sharing one call log.
pub struct Fakes {
    pub log: CallLog,
    pub git: Arc<FakeVersionControl>,
    pub hosting: Arc<FakeHostingService>,
    pub runner: Arc<FakeCommandRunner>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}

impl Fakes {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            git: Arc::new(FakeVersionControl::new(log.clone())),
            hosting: Arc::new(FakeHostingService::new(log.clone())),
            runner: Arc::new(FakeCommandRunner::new(log.clone())),
            log,
        }
    }

    pub fn worker(&self, config: WorkflowConfig) -> Worker {
        Worker::new(
            config,
            self.git.clone(),
            self.hosting.clone(),
            self.runner.clone(),
        )
        .expect("test workflow config is valid")
    }
}
