pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use github::GitHubPlatform;

/// Remote code-hosting service the engine talks to.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Serialized pull-request data: title, body, source branch and comments.
    ///
    /// Fails with [`crate::error::AppError::NotFound`] for unknown numbers.
    async fn fetch_pull_request(&self, number: u64) -> Result<String>;

    /// Post a comment on a pull request.
    async fn post_comment(&self, number: u64, body: &str) -> Result<()>;

    /// Open a pull request from the current branch against the default branch.
    async fn open_pull_request(&self, title: &str, description: &str) -> Result<()>;
}
