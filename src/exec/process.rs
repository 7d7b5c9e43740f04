//! Real [`CommandRunner`] backed by `tokio::process`.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{CommandRunner, ExecutionError, ExecutionResult, Interruption, RunContext};

/// How long pipe readers may keep draining after the child is gone.
/// A grandchild that inherited the pipes can otherwise hold them open forever.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Spawns real OS processes. Every child is killed when dropped.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %program, input_bytes = input.len()))]
    async fn run_with_input(
        &self,
        ctx: &RunContext,
        input: &str,
        program: &str,
        args: &[String],
    ) -> Result<(), ExecutionError> {
        if let Some(reason) = ctx.interruption() {
            return Err(ExecutionError::interrupted(program, reason, ctx.elapsed()));
        }

        debug!(args = ?args, "spawning child process");
        let mut child = group_leader(Command::new(program))
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Launch {
                program: program.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let finished = tokio::select! {
            status = feed_and_wait(&mut child, stdin, input.as_bytes()) => Ok(status),
            reason = ctx.done() => Err(reason),
        };

        match finished {
            Ok(status) => {
                let status = status.map_err(|source| ExecutionError::Io {
                    program: program.to_string(),
                    source,
                })?;
                check_status(program, status)
            }
            Err(reason) => {
                terminate(program, &mut child, reason).await;
                Err(ExecutionError::interrupted(program, reason, ctx.elapsed()))
            }
        }
    }

    #[instrument(skip_all, fields(program = %program))]
    async fn run_captured(
        &self,
        ctx: &RunContext,
        program: &str,
        args: &[String],
    ) -> ExecutionResult {
        if let Some(reason) = ctx.interruption() {
            return ExecutionResult::failed(
                Vec::new(),
                ExecutionError::interrupted(program, reason, ctx.elapsed()),
            );
        }

        debug!(args = ?args, "spawning child process");
        let spawned = group_leader(Command::new(program))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                return ExecutionResult::failed(
                    Vec::new(),
                    ExecutionError::Launch {
                        program: program.to_string(),
                        source,
                    },
                );
            }
        };

        // Both streams append into one buffer so the result reads the way
        // a terminal would have shown it.
        let merged = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&merged)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&merged)));
        }

        let finished = tokio::select! {
            status = child.wait() => Ok(status),
            reason = ctx.done() => Err(reason),
        };

        let failure = match finished {
            Ok(Ok(status)) => check_status(program, status).err(),
            Ok(Err(source)) => Some(ExecutionError::Io {
                program: program.to_string(),
                source,
            }),
            Err(reason) => {
                terminate(program, &mut child, reason).await;
                Some(ExecutionError::interrupted(program, reason, ctx.elapsed()))
            }
        };

        drain_readers(readers).await;
        let output = take_buffer(&merged);

        debug!(output_bytes = output.len(), failed = failure.is_some(), "command finished");
        ExecutionResult { output, failure }
    }
}

async fn feed_and_wait(
    child: &mut Child,
    stdin: Option<tokio::process::ChildStdin>,
    input: &[u8],
) -> std::io::Result<ExitStatus> {
    if let Some(mut stdin) = stdin {
        match stdin.write_all(input).await {
            Ok(()) => {}
            // The child may exit or close stdin without reading everything.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("child closed stdin before reading all input");
            }
            Err(e) => return Err(e),
        }
        // Dropping stdin sends EOF.
        drop(stdin);
    }
    child.wait().await
}

fn check_status(program: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::NonZeroExit {
            program: program.to_string(),
            code: status.code(),
        })
    }
}

/// Put the child in a process group of its own so an interruption can reach
/// everything it spawned.
fn group_leader(mut command: Command) -> Command {
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Kill the child's whole process group, e.g. workers started by the agent.
#[cfg(unix)]
fn kill_process_group(program: &str, child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(program, error = %e, "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_program: &str, _child: &Child) {}

/// Kill the child and reap it so nothing outlives the deadline.
async fn terminate(program: &str, child: &mut Child, reason: Interruption) {
    warn!(program, reason = ?reason, "interrupting child process");
    kill_process_group(program, child);
    if let Err(e) = child.start_kill() {
        // Already exited between the select and now.
        debug!(program, error = %e, "kill failed");
    }
    if let Err(e) = child.wait().await {
        warn!(program, error = %e, "failed to reap child process");
    }
}

fn spawn_reader<R>(mut stream: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "output stream read failed");
                    break;
                }
            }
        }
    })
}

async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
            warn!("output reader still open after child exit, abandoning it");
            reader.abort();
        }
    }
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    match buf.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}
