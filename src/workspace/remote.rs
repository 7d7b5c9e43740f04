use std::fmt;

use crate::error::{AppError, Result};

/// `owner/name` of a repository on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse a remote URL pointing at `host` into owner and repository name.
///
/// Handles `git@host:owner/repo.git`, `ssh://git@host/owner/repo.git` and
/// `https://host/owner/repo.git` (the `.git` suffix is optional).
pub fn parse_remote_url(url: &str, host: &str) -> Result<RepoSlug> {
    let url = url.trim();
    let unparseable = || AppError::git("remote get-url origin", format!("unrecognized remote URL: {url}"));

    let (remote_host, path) = if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("ssh://"))
    {
        let (authority, path) = rest.split_once('/').ok_or_else(unparseable)?;
        // Drop credentials and port: `user:token@host:443`.
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        let authority = authority.split(':').next().unwrap_or(authority);
        (authority, path)
    } else if let Some((user_host, path)) = url.split_once(':') {
        // scp-like syntax: `git@host:owner/repo`.
        let remote_host = user_host.rsplit('@').next().unwrap_or(user_host);
        (remote_host, path)
    } else {
        return Err(unparseable());
    };

    if !remote_host.eq_ignore_ascii_case(host) {
        return Err(AppError::git(
            "remote get-url origin",
            format!("remote {url} does not point at {host}"),
        ));
    }

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    match path.split('/').collect::<Vec<_>>().as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => Ok(RepoSlug::new(*owner, *name)),
        _ => Err(unparseable()),
    }
}
