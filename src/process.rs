//! Child-process handle with piped stdio and a bounded wait.
//!
//! `start` spawns with all three streams piped and drains stdout/stderr on
//! background tasks so the child never blocks on a full pipe. `await_exit`
//! races the child's exit against a deadline and kills it on expiry.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// How a bounded wait ended.
#[derive(Debug)]
pub enum ExitOutcome {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The deadline passed first; the child has been killed.
    TimedOut,
}

pub struct ProcessHandle {
    program: PathBuf,
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stdin: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn `program` with `args`. No shell is involved.
    pub fn start<I, S>(program: &Path, args: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = ?cmd, "Spawning process");
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().map(|s| tokio::spawn(drain(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(drain(s)));

        Ok(Self {
            program: program.to_path_buf(),
            child,
            stdout,
            stderr,
            stdin: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Feed `input` to the child's stdin, then close it.
    ///
    /// The write happens on a background task so a child that never reads
    /// cannot stall the caller past its deadline.
    pub fn write_input(&mut self, input: Vec<u8>) {
        let Some(mut pipe) = self.child.stdin.take() else {
            return;
        };
        let program = self.program.clone();
        self.stdin = Some(tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                // A child may exit without reading its input.
                debug!(program = %program.display(), error = %e, "stdin write failed");
            }
            let _ = pipe.shutdown().await;
        }));
    }

    /// Wait for exit and for both output pipes to close, killing the child
    /// if `timeout` elapses first.
    ///
    /// The deadline also covers draining: a grandchild holding stdout open
    /// cannot keep the caller waiting past `timeout`.
    pub async fn await_exit(mut self, timeout: Duration) -> io::Result<ExitOutcome> {
        // No input was supplied: close stdin so readers see EOF.
        drop(self.child.stdin.take());
        let deadline = Instant::now() + timeout;

        let status = match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.kill().await;
                return Ok(ExitOutcome::TimedOut);
            }
        };

        let mut stdin = self.stdin.take();
        let mut stdout = self.stdout.take();
        let mut stderr = self.stderr.take();
        let drained = tokio::time::timeout_at(deadline, async {
            if let Some(stdin) = stdin.as_mut() {
                let _ = stdin.await;
            }
            let out = collect(stdout.as_mut()).await?;
            let err = collect(stderr.as_mut()).await?;
            Ok::<_, io::Error>((out, err))
        })
        .await;

        for task in [stdout, stderr].into_iter().flatten() {
            task.abort();
        }
        if let Some(task) = stdin {
            task.abort();
        }

        match drained {
            Ok(pipes) => {
                let (stdout, stderr) = pipes?;
                Ok(ExitOutcome::Exited {
                    status,
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                debug!(
                    program = %self.program.display(),
                    "Output still open after exit, giving up at deadline"
                );
                Ok(ExitOutcome::TimedOut)
            }
        }
    }

    /// Kill the child and stop the stdio tasks. Never fails.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(program = %self.program.display(), error = %e, "kill failed (already exited?)");
        }
        for task in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(task) = self.stdin.take() {
            task.abort();
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn collect(task: Option<&mut JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match task {
        Some(task) => task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
        None => Ok(Vec::new()),
    }
}
