use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// Name used for a linked worktree of `branch` (git forbids `/` in it).
///
/// Flattening `/` to `-` alone would send `feature/auth` and `feature-auth`
/// to the same place, so flattened names carry a short digest of the
/// original branch name.
pub fn worktree_name(branch: &str) -> String {
    if !branch.contains('/') {
        return branch.to_string();
    }
    let digest = hex::encode(Sha256::digest(branch.as_bytes()));
    format!("{}-{}", branch.replace('/', "-"), &digest[..8])
}

/// Deterministic worktree location: a sibling of the repository root named
/// `<repo-dir>-<branch>`, so repeated runs agree without storing anything.
pub fn worktree_path_for(repo_root: &Path, branch: &str) -> Result<PathBuf> {
    let repo_dir = repo_root
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AppError::Workspace(format!(
                "Cannot derive worktree path from repository root {}",
                repo_root.display()
            ))
        })?;
    let parent = repo_root.parent().ok_or_else(|| {
        AppError::Workspace(format!(
            "Repository root {} has no parent directory",
            repo_root.display()
        ))
    })?;

    Ok(parent.join(format!("{repo_dir}-{}", worktree_name(branch))))
}

/// Join a repository-relative path onto `root`, refusing anything that
/// would land outside it.
pub fn resolve_in_repo(root: &Path, relative: &str) -> Result<PathBuf> {
    let requested = Path::new(relative);
    let mut resolved = root.to_path_buf();

    for component in requested.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::Workspace(format!(
                    "Path traversal detected: {relative} is outside the repository"
                )));
            }
        }
    }

    if resolved == root {
        return Err(AppError::Workspace(format!("Invalid file path: {relative:?}")));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worktree_path_is_sibling_of_repo() {
        let path = worktree_path_for(Path::new("/home/dev/widgets"), "fix-login").unwrap();
        assert_eq!(path, PathBuf::from("/home/dev/widgets-fix-login"));
    }

    #[test]
    fn test_worktree_path_flattens_slashes() {
        let path = worktree_path_for(Path::new("/home/dev/widgets"), "feature/auth").unwrap();
        assert_eq!(path, PathBuf::from("/home/dev/widgets-feature-auth-fc659bd7"));
        assert_eq!(worktree_name("feature/auth"), "feature-auth-fc659bd7");
    }

    #[test]
    fn test_slash_and_dash_branches_get_distinct_worktrees() {
        let root = Path::new("/home/dev/widgets");
        let branches = ["feature/auth", "feature-auth", "feature/auth-fc659bd7", "a/b", "a-b"];
        let paths: std::collections::HashSet<_> = branches
            .iter()
            .map(|b| worktree_path_for(root, b).unwrap())
            .collect();
        assert_eq!(paths.len(), branches.len());
        assert_eq!(worktree_name("feature-auth"), "feature-auth");
    }

    #[test]
    fn test_worktree_path_is_stable() {
        let root = Path::new("/srv/repo");
        assert_eq!(
            worktree_path_for(root, "a/b").unwrap(),
            worktree_path_for(root, "a/b").unwrap()
        );
    }

    #[test]
    fn test_worktree_path_needs_named_root() {
        assert!(worktree_path_for(Path::new("/"), "main").is_err());
    }

    #[test]
    fn test_resolve_in_repo_keeps_nested_dirs() {
        let root = Path::new("/srv/repo");
        let path = resolve_in_repo(root, "docs/feature/x-instructions.md").unwrap();
        assert_eq!(path, PathBuf::from("/srv/repo/docs/feature/x-instructions.md"));
    }

    #[test]
    fn test_resolve_in_repo_rejects_traversal() {
        let root = Path::new("/srv/repo");
        assert!(resolve_in_repo(root, "../outside.md").is_err());
        assert!(resolve_in_repo(root, "/etc/passwd").is_err());
        assert!(resolve_in_repo(root, "docs/../../x").is_err());
        assert!(resolve_in_repo(root, "").is_err());
    }
}
