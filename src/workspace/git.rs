use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use git2::{
    BranchType, ConfigLevel, Cred, CredentialType, ErrorCode, FetchOptions, IndexAddOption,
    PushOptions, RemoteCallbacks, Repository, Signature, StatusOptions, WorktreeAddOptions,
};

use crate::error::{AppError, Result};
use crate::workspace::manager::{resolve_in_repo, worktree_name, worktree_path_for};
use crate::workspace::remote::{parse_remote_url, RepoSlug};
use crate::workspace::{validate_branch_name, VersionControl};

const ORIGIN: &str = "origin";

/// Map a libgit2 failure onto the git command it stands in for.
fn git_err(command: &'static str) -> impl Fn(git2::Error) -> AppError {
    move |e| AppError::git(command, e.message())
}

/// Credential callback shared by fetch and push.
///
/// HTTPS uses the configured token, else the user's credential helper.
/// SSH goes through the agent.
fn make_callbacks<'a>(token: Option<&'a str>, config: Option<git2::Config>) -> RemoteCallbacks<'a> {
    let mut attempts = 0u8;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(token) = token {
                return Cred::userpass_plaintext("x-access-token", token);
            }
            if let Some(config) = &config {
                return Cred::credential_helper(config, url, username_from_url);
            }
        }
        Cred::default()
    });
    callbacks
}

fn make_fetch_options(token: Option<&str>, config: Option<git2::Config>) -> FetchOptions<'_> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(make_callbacks(token, config));
    opts
}

/// Push options that turn a per-ref rejection into an error; libgit2
/// otherwise reports success for a rejected update.
fn make_push_options(token: Option<&str>, config: Option<git2::Config>) -> PushOptions<'_> {
    let mut callbacks = make_callbacks(token, config);
    callbacks.push_update_reference(|refname, status| match status {
        Some(msg) => Err(git2::Error::from_str(&format!("{refname} rejected: {msg}"))),
        None => Ok(()),
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn open(dir: &Path, command: &'static str) -> Result<Repository> {
    Repository::discover(dir).map_err(git_err(command))
}

/// Root of the main working tree, even when `repo` is a linked worktree.
fn main_root(repo: &Repository) -> Result<PathBuf> {
    repo.commondir()
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| AppError::git("rev-parse --git-common-dir", "repository has no working tree"))
}

fn head_is_branch(repo: &Repository, branch: &str) -> bool {
    match repo.head() {
        Ok(head) => head.is_branch() && head.shorthand() == Some(branch),
        Err(_) => false,
    }
}

/// Path of the working tree that currently has `branch` checked out.
fn find_worktree_for(repo: &Repository, branch: &str) -> Result<Option<PathBuf>> {
    let root = main_root(repo)?;
    let main = Repository::open(&root).map_err(git_err("worktree list"))?;

    if head_is_branch(&main, branch) {
        return Ok(Some(root));
    }

    let names = main.worktrees().map_err(git_err("worktree list"))?;
    for name in names.iter().flatten() {
        let worktree = match main.find_worktree(name) {
            Ok(wt) => wt,
            Err(e) => {
                tracing::debug!(worktree = name, error = %e.message(), "Skipping unreadable worktree");
                continue;
            }
        };
        // Prunable entries (directory gone) cannot be reused.
        if worktree.validate().is_err() {
            continue;
        }
        let linked = Repository::open_from_worktree(&worktree).map_err(git_err("worktree list"))?;
        if head_is_branch(&linked, branch) {
            return Ok(Some(worktree.path().to_path_buf()));
        }
    }
    Ok(None)
}

fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Signature::now("kratt", "kratt@users.noreply.github.com").map_err(git_err("commit")),
    }
}

fn push_refspec(repo: &Repository, remote_name: &str, refspec: &str, token: Option<&str>) -> Result<()> {
    let mut remote = repo
        .find_remote(remote_name)
        .map_err(|e| AppError::git("push", format!("remote '{remote_name}': {}", e.message())))?;
    let mut opts = make_push_options(token, repo.config().ok());
    remote.push(&[refspec], Some(&mut opts)).map_err(git_err("push"))
}

/// Make sure a local `branch` exists, creating it from `origin/<branch>`
/// (fetching that first if needed) with upstream tracking.
fn ensure_local_branch(repo: &Repository, branch: &str, token: Option<&str>) -> Result<()> {
    match repo.find_branch(branch, BranchType::Local) {
        Ok(_) => return Ok(()),
        Err(e) if e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(AppError::git("worktree add", e.message())),
    }

    let remote_ref = format!("refs/remotes/{ORIGIN}/{branch}");
    if repo.find_reference(&remote_ref).is_err() {
        tracing::info!(branch, "Fetching branch from origin");
        let mut remote = repo.find_remote(ORIGIN).map_err(git_err("fetch"))?;
        let refspec = format!("+refs/heads/{branch}:{remote_ref}");
        let mut fetch_opts = make_fetch_options(token, repo.config().ok());
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
            .map_err(git_err("fetch"))?;
    }

    let commit = repo
        .find_reference(&remote_ref)
        .and_then(|r| r.peel_to_commit())
        .map_err(|e| AppError::git("worktree add", format!("branch '{branch}' not found locally or on {ORIGIN}: {}", e.message())))?;
    let mut local = repo
        .branch(branch, &commit, false)
        .map_err(git_err("branch"))?;
    local
        .set_upstream(Some(&format!("{ORIGIN}/{branch}")))
        .map_err(git_err("branch --set-upstream-to"))?;
    Ok(())
}

/// [`VersionControl`] backed by libgit2.
///
/// The repository is rediscovered from the adapter's current directory on
/// every call, so [`VersionControl::change_working_directory`] retargets all
/// later operations at the new worktree.
pub struct GitRepository {
    current_dir: Mutex<PathBuf>,
    host: String,
    token: Option<String>,
}

impl GitRepository {
    pub fn new(start_dir: impl Into<PathBuf>, host: impl Into<String>, token: Option<String>) -> Self {
        Self {
            current_dir: Mutex::new(start_dir.into()),
            host: host.into(),
            token,
        }
    }

    /// Adapter rooted at the process's working directory.
    pub fn from_current_dir(host: impl Into<String>, token: Option<String>) -> Result<Self> {
        let dir = std::env::current_dir()?;
        Ok(Self::new(dir, host, token))
    }

    pub fn current_dir(&self) -> Result<PathBuf> {
        self.current_dir
            .lock()
            .map(|dir| dir.clone())
            .map_err(|_| AppError::Internal("current directory lock poisoned".to_string()))
    }

    fn set_current_dir(&self, path: PathBuf) -> Result<()> {
        let mut dir = self
            .current_dir
            .lock()
            .map_err(|_| AppError::Internal("current directory lock poisoned".to_string()))?;
        *dir = path;
        Ok(())
    }

    /// Run a libgit2 operation on the blocking pool against the current directory.
    async fn blocking<T, F>(&self, command: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path, Option<&str>) -> Result<T> + Send + 'static,
    {
        let dir = self.current_dir()?;
        let token = self.token.clone();
        tokio::task::spawn_blocking(move || f(&dir, token.as_deref()))
            .await
            .map_err(|e| AppError::git(command, format!("task panicked: {e}")))?
    }
}

#[async_trait]
impl VersionControl for GitRepository {
    async fn is_repository(&self) -> Result<bool> {
        self.blocking("rev-parse", |dir, _| match Repository::discover(dir) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(AppError::git("rev-parse", e.message())),
        })
        .await
    }

    async fn repository_owner_and_name(&self) -> Result<RepoSlug> {
        let host = self.host.clone();
        self.blocking("remote get-url origin", move |dir, _| {
            let repo = open(dir, "remote get-url origin")?;
            let remote = repo
                .find_remote(ORIGIN)
                .map_err(|e| AppError::git("remote get-url origin", format!("no {ORIGIN} remote: {}", e.message())))?;
            let url = remote
                .url()
                .ok_or_else(|| AppError::git("remote get-url origin", "remote URL is not valid UTF-8"))?;
            parse_remote_url(url, &host)
        })
        .await
    }

    async fn worktree_exists(&self, branch: &str) -> Result<bool> {
        let branch = branch.to_string();
        self.blocking("worktree list", move |dir, _| {
            let repo = open(dir, "worktree list")?;
            Ok(find_worktree_for(&repo, &branch)?.is_some())
        })
        .await
    }

    async fn create_worktree(&self, branch: &str, path: &Path) -> Result<()> {
        validate_branch_name(branch)?;
        let branch = branch.to_string();
        let path = path.to_path_buf();

        tracing::info!(branch = %branch, path = %path.display(), "Creating worktree");
        self.blocking("worktree add", move |dir, token| {
            let repo = open(dir, "worktree add")?;
            let main = Repository::open(main_root(&repo)?).map_err(git_err("worktree add"))?;
            ensure_local_branch(&main, &branch, token)?;

            let reference = main
                .find_reference(&format!("refs/heads/{branch}"))
                .map_err(git_err("worktree add"))?;
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            main.worktree(&worktree_name(&branch), &path, Some(&opts))
                .map_err(git_err("worktree add"))?;
            Ok(())
        })
        .await
    }

    async fn worktree_path(&self, branch: &str) -> Result<PathBuf> {
        let branch = branch.to_string();
        self.blocking("worktree list", move |dir, _| {
            let repo = open(dir, "worktree list")?;
            match find_worktree_for(&repo, &branch)? {
                Some(path) => Ok(path),
                None => worktree_path_for(&main_root(&repo)?, &branch),
            }
        })
        .await
    }

    async fn change_working_directory(&self, path: &Path) -> Result<()> {
        std::env::set_current_dir(path).map_err(|e| {
            AppError::Workspace(format!("Failed to change directory to {}: {e}", path.display()))
        })?;
        self.set_current_dir(path.to_path_buf())?;
        tracing::debug!(path = %path.display(), "Changed working directory");
        Ok(())
    }

    async fn stage_commit_and_push(&self, message: &str) -> Result<bool> {
        let message = message.to_string();
        self.blocking("commit", move |dir, token| {
            let repo = open(dir, "status")?;

            let mut status_opts = StatusOptions::new();
            status_opts
                .include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);
            let statuses = repo.statuses(Some(&mut status_opts)).map_err(git_err("status"))?;
            if statuses.is_empty() {
                tracing::info!("No changes to commit");
                return Ok(false);
            }

            let mut index = repo.index().map_err(git_err("add"))?;
            index
                .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                .map_err(git_err("add"))?;
            // Picks up deletions, which add_all leaves in the index.
            index.update_all(["*"].iter(), None).map_err(git_err("add"))?;
            index.write().map_err(git_err("add"))?;

            let tree_oid = index.write_tree().map_err(git_err("commit"))?;
            let tree = repo.find_tree(tree_oid).map_err(git_err("commit"))?;
            let head = repo.head().map_err(git_err("commit"))?;
            let head_ref = head
                .name()
                .ok_or_else(|| AppError::git("commit", "HEAD name is not valid UTF-8"))?
                .to_string();
            let parent = head.peel_to_commit().map_err(git_err("commit"))?;
            let sig = signature(&repo)?;
            repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])
                .map_err(git_err("commit"))?;

            // A branch that was never published has no upstream yet; the
            // commit stays local until push_new_branch_upstream.
            let remote_name = match repo.branch_upstream_remote(&head_ref) {
                Ok(name) => name,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    tracing::warn!(branch = %head_ref, "No upstream configured, committed without pushing");
                    return Ok(true);
                }
                Err(e) => return Err(AppError::git("push", e.message())),
            };
            let merge_ref = repo.branch_upstream_merge(&head_ref).map_err(git_err("push"))?;
            let remote_name = remote_name
                .as_str()
                .ok_or_else(|| AppError::git("push", "upstream remote is not valid UTF-8"))?;
            let merge_ref = merge_ref
                .as_str()
                .ok_or_else(|| AppError::git("push", "upstream branch is not valid UTF-8"))?;

            push_refspec(&repo, remote_name, &format!("{head_ref}:{merge_ref}"), token)?;
            tracing::info!(branch = %head_ref, remote = remote_name, "Committed and pushed changes");
            Ok(true)
        })
        .await
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let branch = branch.to_string();
        self.blocking("show-ref", move |dir, _| {
            let repo = open(dir, "show-ref")?;
            let found = match repo.find_branch(&branch, BranchType::Local) {
                Ok(_) => Ok(true),
                Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
                Err(e) => Err(AppError::git("show-ref", e.message())),
            };
            found
        })
        .await
    }

    async fn create_branch(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        let branch = branch.to_string();
        self.blocking("checkout -b", move |dir, _| {
            let repo = open(dir, "checkout -b")?;
            match repo.find_branch(&branch, BranchType::Local) {
                Ok(_) => {
                    return Err(AppError::git(
                        "checkout -b",
                        format!("a branch named '{branch}' already exists"),
                    ))
                }
                Err(e) if e.code() == ErrorCode::NotFound => {}
                Err(e) => return Err(AppError::git("checkout -b", e.message())),
            }

            let commit = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(git_err("checkout -b"))?;
            repo.branch(&branch, &commit, false).map_err(git_err("checkout -b"))?;
            let refname = format!("refs/heads/{branch}");
            let obj = repo.revparse_single(&refname).map_err(git_err("checkout -b"))?;
            repo.checkout_tree(&obj, None).map_err(git_err("checkout -b"))?;
            repo.set_head(&refname).map_err(git_err("checkout -b"))?;
            Ok(())
        })
        .await
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<()> {
        let root = self
            .blocking("rev-parse --show-toplevel", |dir, _| {
                let repo = open(dir, "rev-parse --show-toplevel")?;
                repo.workdir()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| AppError::git("rev-parse --show-toplevel", "repository is bare"))
            })
            .await?;

        let target = resolve_in_repo(&root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Workspace(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&target, content).await.map_err(|e| {
            AppError::Workspace(format!("Failed to write {}: {e}", target.display()))
        })?;
        tracing::debug!(path = %target.display(), bytes = content.len(), "Wrote file");
        Ok(())
    }

    async fn push_new_branch_upstream(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        let branch = branch.to_string();
        self.blocking("push --set-upstream", move |dir, token| {
            let repo = open(dir, "push --set-upstream")?;
            let refname = format!("refs/heads/{branch}");
            push_refspec(&repo, ORIGIN, &format!("{refname}:{refname}"), token)?;

            let mut config = repo
                .config()
                .and_then(|c| c.open_level(ConfigLevel::Local))
                .map_err(git_err("push --set-upstream"))?;
            config
                .set_str(&format!("branch.{branch}.remote"), ORIGIN)
                .map_err(git_err("push --set-upstream"))?;
            config
                .set_str(&format!("branch.{branch}.merge"), &refname)
                .map_err(git_err("push --set-upstream"))?;
            tracing::info!(branch = %branch, "Pushed new branch upstream");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        origin: PathBuf,
    }

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<_> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
    }

    /// Repository `widgets` with one commit and a bare `origin` beside it.
    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("widgets");
        let origin = tmp.path().join("origin.git");

        let repo = Repository::init(&root).unwrap();
        fs::write(root.join("README.md"), "# widgets\n").unwrap();
        commit_all(&repo, "initial");

        Repository::init_bare(&origin).unwrap();
        repo.remote(ORIGIN, origin.to_str().unwrap()).unwrap();

        Fixture {
            _tmp: tmp,
            root,
            origin,
        }
    }

    fn adapter(dir: &Path) -> GitRepository {
        GitRepository::new(dir, "github.com", None)
    }

    fn current_branch(dir: &Path) -> String {
        let repo = Repository::discover(dir).unwrap();
        let head = repo.head().unwrap();
        head.shorthand().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_is_repository() {
        let fx = fixture();
        assert!(adapter(&fx.root).is_repository().await.unwrap());

        let plain = tempfile::tempdir().unwrap();
        assert!(!adapter(plain.path()).is_repository().await.unwrap());
    }

    #[tokio::test]
    async fn test_repository_owner_and_name_from_origin() {
        let fx = fixture();
        let repo = Repository::open(&fx.root).unwrap();
        repo.remote_set_url(ORIGIN, "git@github.com:acme/widgets.git")
            .unwrap();

        let slug = adapter(&fx.root).repository_owner_and_name().await.unwrap();
        assert_eq!(slug, RepoSlug::new("acme", "widgets"));
    }

    #[tokio::test]
    async fn test_repository_owner_and_name_rejects_local_remote() {
        let fx = fixture();
        let err = adapter(&fx.root)
            .repository_owner_and_name()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GitOperation { .. }));
    }

    #[tokio::test]
    async fn test_create_branch_switches_and_refuses_duplicates() {
        let fx = fixture();
        let git = adapter(&fx.root);

        assert!(!git.branch_exists("feature/x").await.unwrap());
        git.create_branch("feature/x").await.unwrap();
        assert!(git.branch_exists("feature/x").await.unwrap());
        assert_eq!(current_branch(&fx.root), "feature/x");

        let err = git.create_branch("feature/x").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_stage_commit_and_push_without_changes_is_noop() {
        let fx = fixture();
        let repo = Repository::open(&fx.root).unwrap();
        let before = repo.head().unwrap().target().unwrap();

        // No upstream is configured, so an attempted push would fail.
        let committed = adapter(&fx.root)
            .stage_commit_and_push("nothing to see")
            .await
            .unwrap();

        assert!(!committed);
        assert_eq!(repo.head().unwrap().target().unwrap(), before);
    }

    #[tokio::test]
    async fn test_start_sequence_commits_then_publishes() {
        let fx = fixture();
        let git = adapter(&fx.root);

        git.create_branch("feature/x").await.unwrap();
        git.write_text_file("docs/feature/x-instructions.md", "do thing")
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(fx.root.join("docs/feature/x-instructions.md")).unwrap(),
            "do thing"
        );

        // Not yet published, so the commit stays local.
        let committed = git
            .stage_commit_and_push("Add instructions for feature/x")
            .await
            .unwrap();
        assert!(committed);
        let origin = Repository::open_bare(&fx.origin).unwrap();
        assert!(origin.find_reference("refs/heads/feature/x").is_err());

        git.push_new_branch_upstream("feature/x").await.unwrap();

        let local = Repository::open(&fx.root).unwrap();
        let head = local.head().unwrap().target().unwrap();
        let pushed = origin
            .find_reference("refs/heads/feature/x")
            .unwrap()
            .target()
            .unwrap();
        assert_eq!(pushed, head);

        let message = local.find_commit(head).unwrap().message().unwrap().to_string();
        assert_eq!(message, "Add instructions for feature/x");

        let config = local.config().unwrap().snapshot().unwrap();
        assert_eq!(config.get_str("branch.feature/x.remote").unwrap(), "origin");
        assert_eq!(
            config.get_str("branch.feature/x.merge").unwrap(),
            "refs/heads/feature/x"
        );
    }

    #[tokio::test]
    async fn test_commit_and_push_follows_upstream() {
        let fx = fixture();
        let git = adapter(&fx.root);
        git.create_branch("work").await.unwrap();
        git.push_new_branch_upstream("work").await.unwrap();

        fs::write(fx.root.join("new.txt"), "content").unwrap();
        fs::remove_file(fx.root.join("README.md")).unwrap();
        assert!(git.stage_commit_and_push("change").await.unwrap());

        let local = Repository::open(&fx.root).unwrap();
        let head = local.head().unwrap().peel_to_commit().unwrap();
        let tree = head.tree().unwrap();
        assert!(tree.get_name("new.txt").is_some());
        assert!(tree.get_name("README.md").is_none());

        let origin = Repository::open_bare(&fx.origin).unwrap();
        let pushed = origin
            .find_reference("refs/heads/work")
            .unwrap()
            .target()
            .unwrap();
        assert_eq!(pushed, head.id());
    }

    #[tokio::test]
    async fn test_write_text_file_rejects_escape() {
        let fx = fixture();
        let err = adapter(&fx.root)
            .write_text_file("../escape.md", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Workspace(_)));
    }

    #[tokio::test]
    async fn test_worktree_lifecycle_for_local_branch() {
        let fx = fixture();
        let repo = Repository::open(&fx.root).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("feature/auth", &head, false).unwrap();

        let git = adapter(&fx.root);
        assert!(!git.worktree_exists("feature/auth").await.unwrap());

        let path = git.worktree_path("feature/auth").await.unwrap();
        assert_eq!(path, fx.root.parent().unwrap().join("widgets-feature-auth-fc659bd7"));

        git.create_worktree("feature/auth", &path).await.unwrap();
        assert!(git.worktree_exists("feature/auth").await.unwrap());
        assert_eq!(git.worktree_path("feature/auth").await.unwrap(), path);
        assert!(path.join("README.md").exists());
        assert_eq!(current_branch(&path), "feature/auth");

        // Operations from inside the worktree see the same layout.
        let inside = adapter(&path);
        assert!(inside.worktree_exists("feature/auth").await.unwrap());
        assert_eq!(inside.worktree_path("feature/auth").await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_slash_and_dash_branches_get_separate_worktrees() {
        let fx = fixture();
        let repo = Repository::open(&fx.root).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("feature/auth", &head, false).unwrap();
        repo.branch("feature-auth", &head, false).unwrap();

        let git = adapter(&fx.root);
        let slashed = git.worktree_path("feature/auth").await.unwrap();
        git.create_worktree("feature/auth", &slashed).await.unwrap();

        assert!(!git.worktree_exists("feature-auth").await.unwrap());
        let dashed = git.worktree_path("feature-auth").await.unwrap();
        assert_ne!(slashed, dashed);
        git.create_worktree("feature-auth", &dashed).await.unwrap();

        assert_eq!(current_branch(&slashed), "feature/auth");
        assert_eq!(current_branch(&dashed), "feature-auth");
        assert_eq!(git.worktree_path("feature/auth").await.unwrap(), slashed);
        assert_eq!(git.worktree_path("feature-auth").await.unwrap(), dashed);
    }

    #[tokio::test]
    async fn test_main_checkout_counts_as_worktree() {
        let fx = fixture();
        let branch = current_branch(&fx.root);
        let git = adapter(&fx.root);

        assert!(git.worktree_exists(&branch).await.unwrap());
        assert_eq!(git.worktree_path(&branch).await.unwrap(), fx.root);
    }

    #[tokio::test]
    async fn test_create_worktree_fetches_remote_branch() {
        let fx = fixture();
        let git = adapter(&fx.root);

        // Publish a branch, then drop the local copy so only origin has it.
        let default_branch = current_branch(&fx.root);
        git.create_branch("pr-branch").await.unwrap();
        git.push_new_branch_upstream("pr-branch").await.unwrap();
        {
            let repo = Repository::open(&fx.root).unwrap();
            let refname = format!("refs/heads/{default_branch}");
            let obj = repo.revparse_single(&refname).unwrap();
            repo.checkout_tree(&obj, None).unwrap();
            repo.set_head(&refname).unwrap();
            repo.find_branch("pr-branch", BranchType::Local)
                .unwrap()
                .delete()
                .unwrap();
            if let Ok(mut r) = repo.find_reference("refs/remotes/origin/pr-branch") {
                r.delete().unwrap();
            };
        }
        assert!(!git.branch_exists("pr-branch").await.unwrap());

        let path = git.worktree_path("pr-branch").await.unwrap();
        git.create_worktree("pr-branch", &path).await.unwrap();

        assert!(git.branch_exists("pr-branch").await.unwrap());
        assert_eq!(current_branch(&path), "pr-branch");

        // The fetched branch tracks origin, so commits from the worktree push.
        fs::write(path.join("fix.txt"), "fixed").unwrap();
        let committed = adapter(&path)
            .stage_commit_and_push("Automated changes")
            .await
            .unwrap();
        assert!(committed);
    }
}
