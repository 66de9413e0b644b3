// mysqlbackuptool/src/backup/db_dump.rs
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::errors::{BackupError, Result};
use crate::utils::{MYSQLDUMP, find_executable};

/// Only the tail of a noisy stderr is kept for the error message.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Running total of bytes pulled out of a dump stream.
///
/// The reader bumps it, anyone holding a clone may sample it.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// Stdout of the dump process. Reading returns whatever is buffered in the pipe
/// (up to the requested size), and zero bytes once the writer has closed it,
/// including after the process has already exited.
pub struct DumpStream {
    inner: ChildStdout,
    counter: ByteCounter,
}

impl AsyncRead for DumpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            self.counter.add((buf.filled().len() - before) as u64);
        }
        poll
    }
}

/// Exit status and captured diagnostics of a finished dump.
#[derive(Debug)]
pub struct DumpExit {
    pub status: ExitStatus,
    pub stderr: String,
}

impl DumpExit {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn into_result(self) -> Result<()> {
        if self.success() {
            Ok(())
        } else {
            Err(BackupError::DumpExit {
                code: self.status.code(),
                stderr: self.stderr,
            })
        }
    }
}

/// An in-flight dump process with a single-reader output stream.
///
/// The handle must be finished with [`DumpHandle::wait`], which reaps the child.
pub struct DumpHandle {
    child: Child,
    stream: Option<DumpStream>,
    stderr_task: Option<JoinHandle<io::Result<String>>>,
    counter: ByteCounter,
}

impl DumpHandle {
    /// Spawns `command` with piped stdout/stderr. Stderr is drained by a background
    /// task so the child can never stall on a full stderr pipe.
    pub fn spawn(mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("dump process has no stdout pipe"))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut captured = Vec::new();
                stderr.read_to_end(&mut captured).await?;
                Ok::<String, io::Error>(stderr_tail(&captured))
            })
        });

        let counter = ByteCounter::default();
        Ok(DumpHandle {
            child,
            stream: Some(DumpStream { inner: stdout, counter: counter.clone() }),
            stderr_task,
            counter,
        })
    }

    /// Shared progress counter; stays valid after the stream is handed out.
    pub fn counter(&self) -> ByteCounter {
        self.counter.clone()
    }

    /// Hands out the output stream. There is exactly one reader per dump.
    pub fn take_stream(&mut self) -> Result<DumpStream> {
        self.stream.take().ok_or(BackupError::StreamAlreadyTaken)
    }

    /// Waits for the process to exit and collects its stderr.
    ///
    /// An untaken stream is dropped first so a child blocked on a full pipe sees EPIPE.
    pub async fn wait(mut self) -> Result<DumpExit> {
        drop(self.stream.take());
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => match task.await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!("Failed to read dump stderr: {}", e);
                    String::new()
                }
                Err(e) => {
                    warn!("Dump stderr reader panicked: {}", e);
                    String::new()
                }
            },
            None => String::new(),
        };
        debug!(?status, bytes = self.counter.get(), "Dump process exited");
        Ok(DumpExit { status, stderr })
    }
}

fn stderr_tail(captured: &[u8]) -> String {
    let start = captured.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&captured[start..]).trim().to_string()
}

/// Launches `mysqldump` for the given databases and returns the running handle.
///
/// An empty selection is rejected before anything is spawned.
pub fn start_dump(source: &SourceConfig, databases: &[String]) -> Result<DumpHandle> {
    if databases.is_empty() {
        return Err(BackupError::EmptySelection);
    }

    let mysqldump_path = find_executable(MYSQLDUMP)?;
    debug!("Found mysqldump executable at: {}", mysqldump_path.display());

    let mut command = Command::new(&mysqldump_path);
    command
        .args(source.connection_args())
        .arg("--single-transaction")
        .arg("--routines")
        .arg("--events")
        .arg("--triggers")
        .arg("--databases")
        .args(databases);
    if let Some(password) = &source.password {
        command.env("MYSQL_PWD", password);
    }

    info!("🔍 Starting mysqldump for: {}", databases.join(" "));
    DumpHandle::spawn(command)
}
