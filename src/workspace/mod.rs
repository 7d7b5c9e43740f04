//! Local version control capability.

pub mod git;
pub mod manager;
pub mod remote;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, Result};

pub use git::GitRepository;
pub use manager::worktree_path_for;
pub use remote::{parse_remote_url, RepoSlug};

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// `false` (not an error) when the working directory is outside any repository.
    async fn is_repository(&self) -> Result<bool>;

    /// Owner and name of the hosting-service repository behind `origin`.
    async fn repository_owner_and_name(&self) -> Result<RepoSlug>;

    async fn worktree_exists(&self, branch: &str) -> Result<bool>;

    async fn create_worktree(&self, branch: &str, path: &Path) -> Result<()>;

    /// Existing worktree path for `branch`, or the derived one if none exists.
    async fn worktree_path(&self, branch: &str) -> Result<PathBuf>;

    /// Switch the process's working directory; later operations run there.
    async fn change_working_directory(&self, path: &Path) -> Result<()>;

    /// Stage everything, commit and push to the configured upstream.
    ///
    /// Returns `Ok(false)` without committing when nothing is pending.
    async fn stage_commit_and_push(&self, message: &str) -> Result<bool>;

    async fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Create `branch` from HEAD and switch to it. Fails if it already exists.
    async fn create_branch(&self, branch: &str) -> Result<()>;

    /// Write `content` to `path` relative to the repository root, creating parents.
    async fn write_text_file(&self, path: &str, content: &str) -> Result<()>;

    /// First push of a new branch, recording `origin` as its upstream.
    async fn push_new_branch_upstream(&self, branch: &str) -> Result<()>;
}

const FORBIDDEN_BRANCH_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', ']', '\\'];

/// Validate a branch name before it reaches git.
///
/// Rejects names starting with `-` so they can never be read as an option.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(AppError::Workspace(format!(
            "Invalid branch name {name:?}: {why}"
        )))
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.starts_with('-') {
        return invalid("must not start with '-'");
    }
    if name.starts_with('.') || name.starts_with('/') || name.ends_with('.') || name.ends_with('/')
    {
        return invalid("must not start or end with '.' or '/'");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || FORBIDDEN_BRANCH_CHARS.contains(c))
    {
        return invalid(&format!("must not contain {c:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        for name in ["feature", "feature/auth", "feature-auth", "feature_auth", "main"] {
            assert!(validate_branch_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_rejects_git_metacharacters() {
        let bad = [
            "",
            ".feature",
            "feature.",
            "/feature",
            "feature/",
            "feature auth",
            "feature:auth",
            "feature?auth",
            "feature*auth",
            "feature[auth]",
            "feature..auth",
            "feature~auth",
            "feature^auth",
            "feature\\auth",
            "feature\tauth",
        ];
        for name in bad {
            assert!(validate_branch_name(name).is_err(), "{name:?} should be rejected");
        }
    }
}
