use thiserror::Error;

use crate::exec::ExecutionError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("git {command} failed: {reason}")]
    GitOperation { command: String, reason: String },

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Branch resolution failed: {0}")]
    BranchResolution(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn git(command: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AppError::GitOperation {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error came from a deadline or an upstream cancellation.
    pub fn is_interruption(&self) -> bool {
        matches!(self, AppError::Execution(e) if e.is_interruption())
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        match &e {
            octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404 => {
                AppError::NotFound(source.message.clone())
            }
            _ => AppError::GitHubApi(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
