//! Subprocess execution backend.
//!
//! Runs source text through an interpreter invoked by absolute path, with the
//! source passed inline so no file is left behind. The child inherits nothing
//! from the parent environment, and a wall-clock timeout is enforced with a
//! forced kill followed by a bounded wait for the process to be reaped.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use code_interpreter_core::config::ExecutionConfig;
use code_interpreter_core::{Error, ExecutionRequest, ExecutionResult, Language, Result};

use crate::output::{truncate_output, MAX_OUTPUT_BYTES};

/// How long to wait for a killed child to exit before abandoning it.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to keep reading the pipes after the interpreter has exited.
///
/// Anything the interpreter itself wrote is already buffered in the pipe by
/// then; the pipes only stay open past this when a descendant inherited them.
pub const PIPE_DRAIN_PERIOD: Duration = Duration::from_secs(1);

/// Bytes read from one child pipe, shared with its reader task.
type PipeBuffer = Arc<Mutex<Vec<u8>>>;

/// Languages this backend can run.
pub const PROCESS_LANGUAGES: &[Language] = &[Language::Python];

/// Short-lived, environment-stripped subprocess backend.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    interpreter: PathBuf,
    timeout_secs: u64,
    grace_period: Duration,
    drain_period: Duration,
    output_limit: usize,
}

impl ProcessBackend {
    /// Create a backend running `interpreter` with the given timeout.
    ///
    /// The interpreter must be an absolute path; it is never resolved through
    /// `PATH` or a shell.
    pub fn new(interpreter: impl Into<PathBuf>, timeout_secs: u64) -> Result<Self> {
        let interpreter = interpreter.into();
        if !interpreter.is_absolute() {
            return Err(Error::invalid_request(format!(
                "Interpreter path must be absolute, got '{}'",
                interpreter.display()
            )));
        }
        if timeout_secs == 0 {
            return Err(Error::invalid_request("Timeout must be at least 1 second"));
        }
        Ok(Self {
            interpreter,
            timeout_secs,
            grace_period: KILL_GRACE_PERIOD,
            drain_period: PIPE_DRAIN_PERIOD,
            output_limit: MAX_OUTPUT_BYTES,
        })
    }

    /// Create a backend from the execution configuration.
    pub fn from_config(config: &ExecutionConfig) -> Result<Self> {
        Self::new(&config.python_path, config.timeout_secs)
    }

    /// Override the post-kill grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Override how long the pipes are drained after the interpreter exits.
    pub fn with_drain_period(mut self, drain_period: Duration) -> Self {
        self.drain_period = drain_period;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Whether the configured interpreter exists on this host.
    pub fn is_available(&self) -> bool {
        self.interpreter.is_file()
    }

    /// Run `code` to completion or until the timeout expires.
    pub async fn run(&self, code: &str, language: Language) -> Result<ExecutionResult> {
        if !PROCESS_LANGUAGES.contains(&language) {
            return Err(Error::unsupported_language(format!(
                "Language '{}' is not supported by the process backend (supported: python). \
                 Use the vm-sandbox backend to run {} code.",
                language, language
            )));
        }
        self.execute(&ExecutionRequest::new(code, language, self.timeout_secs))
            .await
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let mut child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(&request.source)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::tool_execution(format!(
                    "Failed to start interpreter '{}': {}",
                    self.interpreter.display(),
                    e
                ))
            })?;

        let started = Instant::now();
        tracing::debug!(pid = ?child.id(), language = %request.language, interpreter = %self.interpreter.display(), "Spawned interpreter");

        // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
        let stdout_buf = PipeBuffer::default();
        let stderr_buf = PipeBuffer::default();
        let stdout_task = tokio::spawn(read_bounded(
            child.stdout.take(),
            self.output_limit,
            stdout_buf.clone(),
        ));
        let stderr_task = tokio::spawn(read_bounded(
            child.stderr.take(),
            self.output_limit,
            stderr_buf.clone(),
        ));

        let timeout = Duration::from_secs(request.timeout_secs);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                self.drain([stdout_task, stderr_task]).await;
                let mut combined = take_buffer(&stdout_buf);
                combined.extend(take_buffer(&stderr_buf));
                let output = truncate_output(&String::from_utf8_lossy(&combined), self.output_limit);

                tracing::debug!(
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    output_bytes = output.len(),
                    "Interpreter finished"
                );

                if status.success() {
                    Ok(ExecutionResult::success(output))
                } else {
                    Ok(ExecutionResult::failure(output).with_error_detail(describe_exit(status)))
                }
            }
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(Error::tool_execution(format!(
                    "Failed to wait for interpreter: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?child.id(),
                    timeout_secs = request.timeout_secs,
                    "Execution timed out, killing interpreter"
                );
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "Kill signal not delivered (process already gone?)");
                }
                match tokio::time::timeout(self.grace_period, child.wait()).await {
                    Ok(_) => tracing::debug!("Timed-out interpreter reaped"),
                    Err(_) => tracing::warn!(
                        grace_secs = self.grace_period.as_secs(),
                        "Interpreter did not exit after kill; abandoning it"
                    ),
                }
                stdout_task.abort();
                stderr_task.abort();

                Ok(ExecutionResult::failure(format!(
                    "Error: Execution timed out after {}s",
                    request.timeout_secs
                ))
                .with_error_detail("timeout"))
            }
        }
    }

    /// Wait for the reader tasks to hit EOF, sharing one deadline between
    /// them. Readers still blocked at the deadline are aborted; what they have
    /// read so far stays in their buffers.
    async fn drain(&self, tasks: [JoinHandle<()>; 2]) {
        let deadline = tokio::time::Instant::now() + self.drain_period;
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Output reader task failed"),
                Err(_) => {
                    abort.abort();
                    tracing::warn!(
                        "Output pipe still held open after process exit; keeping output read so far"
                    );
                }
            }
        }
    }
}

/// Read a child pipe to EOF into `sink`, keeping at most `limit + 1` bytes.
///
/// Keeping one byte past the budget is enough for truncation to notice the
/// overflow; the rest is read and discarded so the child can keep writing.
async fn read_bounded<R>(stream: Option<R>, limit: usize, sink: PipeBuffer)
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };

    let keep = limit.saturating_add(1);
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut kept = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let room = keep.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Error reading child output");
                break;
            }
        }
    }
}

fn take_buffer(buffer: &PipeBuffer) -> Vec<u8> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
}

fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("Process exited with status {}", code),
        (None, Some(signal)) => format!("Process terminated by signal {}", signal),
        (None, None) => "Process terminated abnormally".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON: &str = "/usr/bin/python3";

    fn python_backend(timeout_secs: u64) -> Option<ProcessBackend> {
        let backend = ProcessBackend::new(PYTHON, timeout_secs).unwrap();
        backend.is_available().then_some(backend)
    }

    #[test]
    fn test_rejects_relative_interpreter() {
        let err = ProcessBackend::new("python3", 5).unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(ProcessBackend::new(PYTHON, 0).is_err());
    }

    #[tokio::test]
    async fn test_rejects_other_languages_without_spawning() {
        // A path that cannot exist: reaching spawn would yield a ToolExecution error.
        let backend = ProcessBackend::new("/nonexistent/interpreter", 5).unwrap();
        let err = backend
            .run("console.log(2+2)", Language::JavaScript)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedLanguage(_)));
        let msg = err.to_string();
        assert!(msg.contains("javascript"));
        assert!(msg.contains("vm-sandbox"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_an_error() {
        let backend = ProcessBackend::new("/nonexistent/interpreter", 5).unwrap();
        let err = backend.run("print(1)", Language::Python).await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution(_)));
    }

    #[tokio::test]
    async fn test_prints_result() {
        let Some(backend) = python_backend(10) else { return };
        let result = backend.run("print(2+2)", Language::Python).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.output.trim(), "4");
    }

    #[tokio::test]
    async fn test_stdout_then_stderr() {
        let Some(backend) = python_backend(10) else { return };
        let code = "import sys\n\
                    sys.stderr.write('err')\n\
                    sys.stderr.flush()\n\
                    sys.stdout.write('out')\n";
        let result = backend.run(code, Language::Python).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.output, "outerr");
    }

    #[tokio::test]
    async fn test_environment_is_stripped() {
        let Some(backend) = python_backend(10) else { return };
        let code = "import os; print('PATH' in os.environ, 'HOME' in os.environ)";
        let result = backend.run(code, Language::Python).await.unwrap();
        assert_eq!(result.output.trim(), "False False");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_output() {
        let Some(backend) = python_backend(10) else { return };
        let code = "print('before'); raise SystemExit(3)";
        let result = backend.run(code, Language::Python).await.unwrap();
        assert!(!result.succeeded);
        assert!(result.output.contains("before"));
        assert_eq!(
            result.error_detail.as_deref(),
            Some("Process exited with status 3")
        );
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let Some(backend) = python_backend(10) else { return };
        let result = backend
            .run("print('x' * 50000)", Language::Python)
            .await
            .unwrap();
        assert!(result.succeeded);
        assert!(result.output.len() <= MAX_OUTPUT_BYTES + crate::output::TRUNCATION_MARKER.len());
        assert!(result.output.ends_with(crate::output::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let Some(backend) = python_backend(1) else { return };
        let started = Instant::now();
        let result = backend
            .run("import time; time.sleep(10)", Language::Python)
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert!(result.output.contains("timed out"));
        assert!(result.output.contains("1s"));
        assert!(started.elapsed() < Duration::from_secs(1) + KILL_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn test_output_survives_descendant_holding_pipes() {
        let Some(backend) = python_backend(10) else { return };
        if !Path::new("/bin/sleep").is_file() {
            return;
        }
        let backend = backend.with_drain_period(Duration::from_millis(300));
        // The sleeper inherits stdout and stderr and outlives the interpreter.
        let code = "import subprocess\n\
                    print('visible result', flush=True)\n\
                    subprocess.Popen(['/bin/sleep', '5'])\n";

        let started = Instant::now();
        let result = backend.run(code, Language::Python).await.unwrap();

        assert!(result.succeeded);
        assert_eq!(result.output.trim(), "visible result");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
