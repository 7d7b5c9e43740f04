//! Command execution capability.
//!
//! The engine never spawns processes itself; it goes through a
//! [`CommandRunner`] so tests can substitute a scripted runner. Both
//! operations are bounded by a [`RunContext`].

pub mod context;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use context::{Interruption, RunContext};
pub use process::ProcessRunner;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}", describe_exit(.code))]
    NonZeroExit { program: String, code: Option<i32> },

    #[error("`{program}` timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("`{program}` was cancelled")]
    Cancelled { program: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl ExecutionError {
    /// Deadline elapsed or the run was cancelled from upstream.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            ExecutionError::TimedOut { .. } | ExecutionError::Cancelled { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::TimedOut { .. })
    }

    pub(crate) fn interrupted(program: &str, reason: Interruption, after: Duration) -> Self {
        match reason {
            Interruption::DeadlineExceeded => ExecutionError::TimedOut {
                program: program.to_string(),
                after,
            },
            Interruption::Cancelled => ExecutionError::Cancelled {
                program: program.to_string(),
            },
        }
    }
}

/// Outcome of a captured run: merged stdout/stderr plus an optional failure.
///
/// Output is kept even when the command failed, since a failing lint or
/// test run is exactly what ends up in the report.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub output: Vec<u8>,
    pub failure: Option<ExecutionError>,
}

impl ExecutionResult {
    pub fn success(output: Vec<u8>) -> Self {
        Self {
            output,
            failure: None,
        }
    }

    pub fn failed(output: Vec<u8>, failure: ExecutionError) -> Self {
        Self {
            output,
            failure: Some(failure),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `input` on stdin and wait for it to exit.
    async fn run_with_input(
        &self,
        ctx: &RunContext,
        input: &str,
        program: &str,
        args: &[String],
    ) -> Result<(), ExecutionError>;

    /// Run `program` with no stdin, capturing stdout and stderr interleaved.
    async fn run_captured(&self, ctx: &RunContext, program: &str, args: &[String])
        -> ExecutionResult;
}

/// Render an argv as a single line for logs and lookups.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
