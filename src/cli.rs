//! Command-line surface: `kratt worker run` and `kratt worker start`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::{
    AppConfig, WorkerConfig, DEFAULT_IMPLEMENTATION_INSTRUCTIONS, DEFAULT_REVIEW_INSTRUCTIONS,
};
use crate::exec::{CommandRunner, ProcessRunner};
use crate::platform::{GitHubPlatform, HostingService};
use crate::workflow::{ProcessOutcome, StartOutcome, WorkflowConfig, Worker};
use crate::workspace::{validate_branch_name, GitRepository, RepoSlug, VersionControl};

#[derive(Parser, Debug)]
#[command(
    name = "kratt",
    version,
    about = "Run an AI coding agent against pull requests"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Deadline for the agent, lint and test steps together (e.g. 30m, 1h30m, 90s)
    #[arg(long, global = true, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// File whose content replaces the default agent instructions
    #[arg(long = "instructions", global = true, value_name = "FILE")]
    pub instructions_file: Option<PathBuf>,

    /// Agent command, comma separated (default: amp,--stdin)
    #[arg(long, global = true, value_delimiter = ',')]
    pub agent: Option<Vec<String>>,

    /// Lint command, comma separated (default: go,fmt,./...)
    #[arg(long, global = true, value_delimiter = ',')]
    pub lint: Option<Vec<String>>,

    /// Test command, comma separated (default: go,test,./...)
    #[arg(long, global = true, value_delimiter = ',')]
    pub test: Option<Vec<String>>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull-request worker commands
    #[command(subcommand)]
    Worker(WorkerCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Process a specific pull request in the current repository
    Run {
        /// Pull request number
        pr_number: String,
    },
    /// Create a new branch with instructions and open a pull request
    Start {
        /// Name of the branch to create
        branch: String,
        /// Instructions to record for the implementation
        instructions: String,
    },
}

/// Parse `90s`, `30m`, `1h`, `1h30m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let secs = match text.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => parse_units(text).ok_or_else(|| {
            format!("invalid duration {input:?}: expected forms like 90s, 30m, 1h30m")
        })?,
    };
    if secs == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

fn parse_units(text: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }
    // A trailing number without a unit is ambiguous.
    digits.is_empty().then_some(total)
}

pub fn parse_pr_number(raw: &str) -> anyhow::Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("invalid pull request number: must be a positive integer"),
    }
}

/// Command-line flags win over file and environment configuration.
pub fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    let worker = &mut config.worker;
    if let Some(timeout) = cli.timeout {
        worker.timeout_secs = timeout.as_secs();
    }
    if let Some(path) = &cli.instructions_file {
        worker.instructions_path = Some(path.clone());
    }
    if let Some(agent) = &cli.agent {
        worker.agent = agent.clone();
    }
    if let Some(lint) = &cli.lint {
        worker.lint = lint.clone();
    }
    if let Some(test) = &cli.test {
        worker.test = test.clone();
    }
}

fn workflow_config(worker: &WorkerConfig, instructions: String) -> WorkflowConfig {
    WorkflowConfig {
        agent: worker.agent.clone(),
        lint: worker.lint.clone(),
        test: worker.test.clone(),
        instructions,
        timeout: worker.timeout(),
    }
}

/// Builds the hosting service once the repository is known.
pub type ConnectHosting =
    Box<dyn FnOnce(RepoSlug) -> crate::error::Result<Arc<dyn HostingService>> + Send>;

/// Capabilities a command runs against.
pub struct Capabilities {
    pub git: Arc<dyn VersionControl>,
    pub connect: ConnectHosting,
    pub runner: Arc<dyn CommandRunner>,
}

impl Capabilities {
    /// Real adapters rooted at the process's working directory.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let git = GitRepository::from_current_dir(
            config.github.host.clone(),
            config.github.resolved_token(),
        )?;
        let github = config.github.clone();
        Ok(Self {
            git: Arc::new(git),
            connect: Box::new(move |slug| {
                let platform: Arc<dyn HostingService> = Arc::new(GitHubPlatform::new(&github, slug)?);
                Ok(platform)
            }),
            runner: Arc::new(ProcessRunner::new()),
        })
    }
}

/// Repository checks shared by both commands.
async fn preflight(git: &dyn VersionControl) -> anyhow::Result<RepoSlug> {
    let is_repository = git
        .is_repository()
        .await
        .map_err(|e| anyhow!("error checking git repository: {e}"))?;
    if !is_repository {
        bail!("current directory is not a git repository");
    }
    git.repository_owner_and_name()
        .await
        .map_err(|e| anyhow!("no GitHub remote found in current repository: {e}"))
}

/// `kratt worker run <pr-number>`.
pub async fn run_pull_request(
    raw_pr_number: &str,
    worker: &WorkerConfig,
    caps: Capabilities,
    cancel: CancellationToken,
) -> anyhow::Result<ProcessOutcome> {
    let pr_number = parse_pr_number(raw_pr_number)?;
    let slug = preflight(caps.git.as_ref()).await?;
    tracing::info!(pr = pr_number, repo = %slug, "Processing pull request");

    let instructions = worker.instructions(DEFAULT_REVIEW_INSTRUCTIONS)?;
    let hosting = (caps.connect)(slug)?;
    let engine = Worker::new(workflow_config(worker, instructions), caps.git, hosting, caps.runner)?
        .with_cancellation(cancel);

    let outcome = engine
        .process_existing(pr_number)
        .await
        .map_err(|e| anyhow!("failed to process PR #{pr_number}: {e}"))?;
    tracing::info!(pr = pr_number, committed = outcome.committed, "Successfully processed pull request");
    Ok(outcome)
}

/// `kratt worker start <branch> <instructions>`.
pub async fn start_branch(
    branch: &str,
    instructions: &str,
    worker: &WorkerConfig,
    caps: Capabilities,
    cancel: CancellationToken,
) -> anyhow::Result<StartOutcome> {
    validate_branch_name(branch).map_err(|e| anyhow!("invalid branch name: {e}"))?;
    let slug = preflight(caps.git.as_ref()).await?;
    tracing::info!(branch, repo = %slug, "Creating branch");

    let exists = caps
        .git
        .branch_exists(branch)
        .await
        .map_err(|e| anyhow!("error checking if branch exists: {e}"))?;
    if exists {
        bail!("branch already exists: {branch}");
    }

    let hosting = (caps.connect)(slug)?;
    let config = workflow_config(worker, DEFAULT_IMPLEMENTATION_INSTRUCTIONS.to_string());
    let engine = Worker::new(config, caps.git, hosting, caps.runner)?.with_cancellation(cancel);

    let outcome = engine
        .start_new(branch, instructions)
        .await
        .map_err(|e| anyhow!("failed to start branch {branch}: {e}"))?;
    tracing::info!(branch, title = %outcome.title, "Successfully created branch and opened pull request");
    Ok(outcome)
}

/// Load configuration, wire the real adapters and run the chosen command.
pub async fn execute(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    tracing::debug!(config = ?config, "Loaded configuration");

    let caps = Capabilities::from_config(&config)?;
    dispatch(&cli.command, &config.worker, caps, cancel).await
}

/// Run a parsed subcommand against the given capabilities.
pub async fn dispatch(
    command: &Command,
    worker: &WorkerConfig,
    caps: Capabilities,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Worker(WorkerCommand::Run { pr_number }) => {
            run_pull_request(pr_number, worker, caps, cancel).await?;
        }
        Command::Worker(WorkerCommand::Start {
            branch,
            instructions,
        }) => {
            start_branch(branch, instructions, worker, caps, cancel).await?;
        }
    }
    Ok(())
}
