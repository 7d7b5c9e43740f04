use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::CreatePullRequest;
use crate::platform::HostingService;
use crate::workspace::RepoSlug;

use super::mapper;

/// [`HostingService`] backed by the GitHub REST API for one repository.
pub struct GitHubPlatform {
    client: Octocrab,
    repo: RepoSlug,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig, repo: RepoSlug) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = config.resolved_token() {
            builder = builder.personal_token(token);
        } else {
            tracing::warn!("No GitHub token configured; write operations will fail");
        }
        if let Some(base) = config.api_base_url() {
            builder = builder
                .base_uri(base.as_str())
                .map_err(|e| AppError::Config(format!("Invalid GitHub API URL {base}: {e}")))?;
        }
        let client = builder
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self { client, repo })
    }

    pub fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    async fn default_branch(&self) -> Result<String> {
        let repo = self
            .client
            .repos(&self.repo.owner, &self.repo.name)
            .get()
            .await?;
        Ok(repo.default_branch.unwrap_or_else(|| "main".to_string()))
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<()> {
        let created = self
            .client
            .pulls(&self.repo.owner, &self.repo.name)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        tracing::info!(
            repo = %self.repo,
            pr = created.number,
            url = created.html_url.as_ref().map(|u| u.as_str()).unwrap_or_default(),
            "Opened pull request"
        );
        Ok(())
    }
}

/// Branch checked out in the process's working directory.
async fn current_branch() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        let dir = std::env::current_dir()?;
        let repo = git2::Repository::discover(&dir)
            .map_err(|e| AppError::git("rev-parse --abbrev-ref HEAD", e.message()))?;
        let head = repo
            .head()
            .map_err(|e| AppError::git("rev-parse --abbrev-ref HEAD", e.message()))?;
        if !head.is_branch() {
            return Err(AppError::git("rev-parse --abbrev-ref HEAD", "HEAD is detached"));
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| AppError::git("rev-parse --abbrev-ref HEAD", "branch name is not valid UTF-8"))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Branch lookup task panicked: {e}")))?
}

#[async_trait]
impl HostingService for GitHubPlatform {
    async fn fetch_pull_request(&self, number: u64) -> Result<String> {
        let pr = self
            .client
            .pulls(&self.repo.owner, &self.repo.name)
            .get(number)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::NotFound(_) => {
                    AppError::NotFound(format!("pull request #{number} in {}", self.repo))
                }
                other => other,
            })?;

        let comments_page = self
            .client
            .issues(&self.repo.owner, &self.repo.name)
            .list_comments(number)
            .per_page(100)
            .send()
            .await?;

        let info = mapper::map_pull_request(&pr, comments_page.items);
        tracing::debug!(pr = number, comments = info.comments.len(), "Fetched pull request");
        Ok(serde_json::to_string_pretty(&info)?)
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        self.client
            .issues(&self.repo.owner, &self.repo.name)
            .create_comment(number, body)
            .await?;

        tracing::info!(pr = number, bytes = body.len(), "Posted comment");
        Ok(())
    }

    async fn open_pull_request(&self, title: &str, description: &str) -> Result<()> {
        let head_branch = current_branch().await?;
        let base_branch = self.default_branch().await?;

        self.create_pull_request(&CreatePullRequest {
            title: title.to_string(),
            body: description.to_string(),
            head_branch,
            base_branch,
        })
        .await
    }
}
