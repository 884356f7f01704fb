//! Script executor - the parent side of the LZY channel.
//!
//! Flow for one request:
//! 1. Resolve the script name to a file in the scripts directory
//! 2. Spawn the interpreter with piped stdin/stdout/stderr
//! 3. Write one request frame and close stdin, while reading one response
//!    frame from stdout
//! 4. Wait for the worker to exit (briefly, once a response has arrived)
//! 5. Append stderr of failed runs to `<logs_dir>/<script>.log`
//!
//! The exchange runs under a timeout; on expiry the worker is killed. A
//! worker that already delivered its frame is never timed out, only reaped.
//! Nothing is retried: a failed worker is reported to the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};

use lazycomm_bridge::{FrameCodec, FrameError, Request, Response};

use crate::config::Config;

/// Captured stderr beyond this is discarded (the pipe is still drained).
const MAX_STDERR_BYTES: u64 = 1024 * 1024;

/// How long to wait for stderr to close once the worker is gone.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// How long a worker may keep running after its response frame arrived.
const EXIT_GRACE: Duration = Duration::from_secs(1);

const LOG_SEPARATOR: &str = "\n-----------------------------\n";

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("script disabled: {0}")]
    Disabled(String),

    #[error("failed to execute script {script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create pipe {pipe}: {script}")]
    Pipe { script: String, pipe: &'static str },

    #[error("script exited with exit code {code}. stderr was logged")]
    Exited { script: String, code: i32 },

    #[error("script {script} exited without responding")]
    NoResponse { script: String },

    #[error("invalid response from script {script}: {source}")]
    InvalidResponse {
        script: String,
        #[source]
        source: FrameError,
    },

    #[error("script {script} timed out after {}ms", .timeout.as_millis())]
    TimedOut { script: String, timeout: Duration },
}

impl ScriptError {
    /// HTTP status the gateway reports for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ScriptError::NotFound(_) => 404,
            ScriptError::Disabled(_) => 403,
            ScriptError::NoResponse { .. } | ScriptError::InvalidResponse { .. } => 502,
            ScriptError::TimedOut { .. } => 504,
            ScriptError::Spawn { .. } | ScriptError::Pipe { .. } | ScriptError::Exited { .. } => {
                500
            }
        }
    }
}

/// Runs one worker process per request.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    scripts_dir: PathBuf,
    logs_dir: PathBuf,
    interpreter: Vec<String>,
    timeout: Duration,
    max_request_bytes: usize,
    max_response_bytes: usize,
}

impl ScriptExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            scripts_dir: config.scripts_dir.clone(),
            logs_dir: config.logs_dir.clone(),
            interpreter: config.interpreter.clone(),
            timeout: config.timeout(),
            max_request_bytes: config.max_request_bytes,
            max_response_bytes: config.max_response_bytes,
        }
    }

    /// Largest request body the gateway accepts for this executor.
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Map a script name to its file.
    ///
    /// Names starting with `_` or `.` are disabled. `<name>.py` is tried
    /// first, then the hidden `.<name>.py`. A lone `_<name>.py` marks the
    /// script as disabled.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ScriptError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(ScriptError::NotFound(name.to_string()));
        }
        if name.starts_with('_') || name.starts_with('.') {
            return Err(ScriptError::Disabled(name.to_string()));
        }

        for candidate in [format!("{name}.py"), format!(".{name}.py")] {
            let path = self.scripts_dir.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }

        if self.scripts_dir.join(format!("_{name}.py")).is_file() {
            return Err(ScriptError::Disabled(name.to_string()));
        }
        Err(ScriptError::NotFound(name.to_string()))
    }

    /// Run `script` with `request` and return its response.
    pub async fn execute(&self, script: &str, request: Request) -> Result<Response, ScriptError> {
        let path = self.resolve(script)?;
        let deadline = Instant::now() + self.timeout;
        let mut child = self.spawn(script, &path)?;
        tracing::info!(script, pid = ?child.id(), "Started script");

        let pipe = |pipe: &'static str| ScriptError::Pipe {
            script: script.to_string(),
            pipe,
        };
        let stdin = child.stdin.take().ok_or_else(|| pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe("stderr"))?;

        let stderr_task = tokio::spawn(collect_output(stderr));
        let codec = FrameCodec::<Response>::new().with_max_payload(self.max_response_bytes);

        let exchanged =
            tokio::time::timeout_at(deadline, exchange(script, stdin, stdout, codec, request))
                .await;
        let Ok(response) = exchanged else {
            return Err(self.timed_out(script, &mut child, stderr_task).await);
        };

        let status = match &response {
            // A complete frame is the answer; the exit is no longer timed.
            Ok(Some(_)) => match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(script, "Script still running after responding, killing");
                    kill(script, &mut child).await
                }
            },
            _ => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => status,
                Err(_) => return Err(self.timed_out(script, &mut child, stderr_task).await),
            },
        };

        let captured = finish_stderr(stderr_task).await;
        let status = status.map_err(|source| ScriptError::Spawn {
            script: script.to_string(),
            source,
        })?;

        let failed = !status.success();
        if failed || response.is_err() {
            self.log_stderr(script, &captured).await;
        }
        if failed {
            tracing::warn!(script, exit_code = exit_code(status), "Script exited with error");
        }

        match response {
            Ok(Some(response)) => {
                tracing::info!(script, status = response.status, "Script responded");
                Ok(response)
            }
            Ok(None) if failed => Err(ScriptError::Exited {
                script: script.to_string(),
                code: exit_code(status),
            }),
            Ok(None) => Err(ScriptError::NoResponse {
                script: script.to_string(),
            }),
            Err(source) => {
                tracing::error!(script, error = %source, "Response parse error");
                Err(ScriptError::InvalidResponse {
                    script: script.to_string(),
                    source,
                })
            }
        }
    }

    /// Kill a worker that ran past the deadline and log what it wrote.
    async fn timed_out(
        &self,
        script: &str,
        child: &mut Child,
        stderr_task: JoinHandle<Vec<u8>>,
    ) -> ScriptError {
        tracing::warn!(
            script,
            timeout_ms = self.timeout.as_millis() as u64,
            "Script timed out, killing"
        );
        let _ = kill(script, child).await;
        let captured = finish_stderr(stderr_task).await;
        self.log_stderr(script, &captured).await;
        ScriptError::TimedOut {
            script: script.to_string(),
            timeout: self.timeout,
        }
    }

    fn spawn(&self, script: &str, path: &Path) -> Result<Child, ScriptError> {
        let spawn_error = |source| ScriptError::Spawn {
            script: script.to_string(),
            source,
        };
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| spawn_error(io::Error::other("no interpreter configured")))?;

        Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)
    }

    /// Append captured stderr to the script's log file.
    async fn log_stderr(&self, script: &str, captured: &[u8]) {
        if let Err(e) = self.append_log(script, captured).await {
            tracing::warn!(script, error = %e, "Failed to write script log");
        }
    }

    async fn append_log(&self, script: &str, captured: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.logs_dir).await?;
        let path = self.logs_dir.join(format!("{script}.log"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        // One write per entry so concurrent runs of a script do not interleave.
        let mut entry = Vec::with_capacity(captured.len() + LOG_SEPARATOR.len());
        entry.extend_from_slice(captured);
        entry.extend_from_slice(LOG_SEPARATOR.as_bytes());
        file.write_all(&entry).await?;
        file.flush().await?;
        tracing::debug!(script, log = %path.display(), bytes = captured.len(), "Logged script stderr");
        Ok(())
    }
}

/// Write the request while reading the response.
///
/// Both directions run concurrently so a worker that writes before it has
/// read everything cannot deadlock the pipes.
async fn exchange(
    script: &str,
    stdin: ChildStdin,
    stdout: ChildStdout,
    codec: FrameCodec<Response>,
    request: Request,
) -> Result<Option<Response>, FrameError> {
    let send = async move {
        let mut writer = FramedWrite::new(stdin, FrameCodec::<Request>::new());
        if let Err(e) = writer.send(request).await {
            // The worker may legitimately exit before reading its input.
            tracing::warn!(script, error = %e, "Failed to write request frame");
        }
        // Dropping the writer closes stdin.
    };
    let receive = async move {
        let mut reader = FramedRead::new(stdout, codec);
        reader.next().await.transpose()
    };

    let ((), response) = tokio::join!(send, receive);
    response
}

async fn kill(script: &str, child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        tracing::warn!(script, error = %e, "Failed to kill script");
    }
    child.wait().await
}

/// Read a stream to EOF, keeping at most `MAX_STDERR_BYTES`.
async fn collect_output<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut captured = Vec::new();
    if let Err(e) = (&mut reader)
        .take(MAX_STDERR_BYTES)
        .read_to_end(&mut captured)
        .await
    {
        tracing::debug!(error = %e, "Stderr read failed");
        return captured;
    }
    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
        tracing::debug!(error = %e, "Stderr drain failed");
    }
    captured
}

async fn finish_stderr(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(STDERR_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Stderr collector failed");
            Vec::new()
        }
        Err(_) => {
            tracing::debug!("Stderr still open after worker exit, giving up");
            Vec::new()
        }
    }
}

/// Exit code, or -1 when the worker was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
