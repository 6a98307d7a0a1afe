//! External VM sandbox runtime collaborator.
//!
//! The interpreter does not implement VM isolation itself. It needs exactly
//! one operation from the runtime: run the workload stored at a path and say
//! whether it succeeded. `SandboxRuntimeFactory` builds a runtime from the
//! log and tmp directories it should use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::process::Command;

use code_interpreter_core::{Error, Result};

// =============================================================================
// Runtime Types
// =============================================================================

/// Unique identifier for a sandbox runtime instance.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directories handed to a runtime at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub log_directory: PathBuf,
    pub tmp_directory: PathBuf,
}

/// What the runtime reports back for one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    /// Error or stderr text on failure.
    pub error: Option<String>,
    /// Output returned in the result object, for runtimes that do so.
    pub stdout: Option<String>,
}

impl SandboxOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: Option<String>) -> Self {
        Self {
            success: false,
            error,
            stdout: None,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }
}

// =============================================================================
// Runtime Traits
// =============================================================================

/// A long-lived handle to a VM-isolated execution runtime.
///
/// Implementations own their resource limits; callers enforce no timeout.
/// Concurrent `run` calls on one handle are only safe if the runtime is
/// reentrant.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Run the workload stored at `workload`.
    async fn run(&self, workload: &Path) -> Result<SandboxOutcome>;

    /// Drop any cached state the runtime keeps between runs.
    async fn clear_cache(&self) -> Result<String> {
        Ok("Cache clearing is not supported by this sandbox runtime.".to_string())
    }
}

/// Builds sandbox runtime handles.
#[async_trait]
pub trait SandboxRuntimeFactory: Send + Sync {
    /// Construct a runtime using the given directories.
    async fn create(&self, settings: &SandboxSettings) -> Result<Arc<dyn SandboxRuntime>>;

    /// Whether construction can be expected to succeed on this host.
    fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Command Runtime
// =============================================================================

/// Sub-directory of the tmp directory the command runtime may cache into.
pub const RUNTIME_CACHE_DIR: &str = "runtime-cache";

/// Runtime backed by an external sandbox executable.
///
/// The executable receives the workload path as its last argument and writes
/// program output directly to the inherited standard output. Its standard
/// error is collected as failure detail.
pub struct CommandSandboxRuntime {
    id: SandboxId,
    program: PathBuf,
    args: Vec<String>,
    settings: SandboxSettings,
}

impl CommandSandboxRuntime {
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Directory handed to the executable as `SANDBOX_CACHE_DIR`.
    pub fn cache_dir(&self) -> PathBuf {
        self.settings.tmp_directory.join(RUNTIME_CACHE_DIR)
    }
}

#[async_trait]
impl SandboxRuntime for CommandSandboxRuntime {
    async fn run(&self, workload: &Path) -> Result<SandboxOutcome> {
        tracing::debug!(sandbox = %self.id, workload = %workload.display(), "Submitting workload");

        // `output()` would pipe stdout too; spawn so fd 1 stays inherited.
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(workload)
            .env_clear()
            .env("SANDBOX_LOG_DIR", &self.settings.log_directory)
            .env("SANDBOX_TMP_DIR", &self.settings.tmp_directory)
            .env("SANDBOX_CACHE_DIR", self.cache_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::sandbox_unavailable(format!(
                    "Failed to launch sandbox runtime '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;
        let output = child.wait_with_output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            Ok(SandboxOutcome::succeeded())
        } else {
            tracing::debug!(sandbox = %self.id, status = %output.status, "Workload failed");
            let detail = if stderr.is_empty() {
                None
            } else {
                Some(stderr)
            };
            Ok(SandboxOutcome::failed(detail))
        }
    }

    async fn clear_cache(&self) -> Result<String> {
        let cache_dir = self.cache_dir();
        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }
        tracing::info!(sandbox = %self.id, removed, "Sandbox cache cleared");
        Ok(format!("Sandbox cache cleared ({} entries removed).", removed))
    }
}

/// Factory for [`CommandSandboxRuntime`].
#[derive(Debug, Clone)]
pub struct CommandSandboxFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSandboxFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl SandboxRuntimeFactory for CommandSandboxFactory {
    async fn create(&self, settings: &SandboxSettings) -> Result<Arc<dyn SandboxRuntime>> {
        if !self.program.is_absolute() || !self.program.is_file() {
            return Err(Error::sandbox_unavailable(format!(
                "Sandbox runtime '{}' not found",
                self.program.display()
            )));
        }
        tokio::fs::create_dir_all(&settings.log_directory).await?;
        tokio::fs::create_dir_all(&settings.tmp_directory).await?;
        tokio::fs::create_dir_all(settings.tmp_directory.join(RUNTIME_CACHE_DIR)).await?;

        let runtime = CommandSandboxRuntime {
            id: SandboxId(format!("vm-sandbox-{}", uuid::Uuid::new_v4())),
            program: self.program.clone(),
            args: self.args.clone(),
            settings: settings.clone(),
        };
        tracing::info!(sandbox = %runtime.id, program = %self.program.display(), "Sandbox runtime created");
        Ok(Arc::new(runtime))
    }

    fn is_available(&self) -> bool {
        self.program.is_absolute() && self.program.is_file()
    }
}

// =============================================================================
// Mock Runtime (for testing without a VM runtime)
// =============================================================================

/// One scripted response of [`MockSandboxRuntime`].
///
/// The default is a successful run that prints nothing.
#[derive(Debug, Clone)]
pub struct MockRun {
    /// Written straight to file descriptor 1 while the run is in flight.
    pub fd_stdout: String,
    pub outcome: SandboxOutcome,
}

impl MockRun {
    pub fn printing(text: impl Into<String>) -> Self {
        Self {
            fd_stdout: text.into(),
            outcome: SandboxOutcome::succeeded(),
        }
    }

    pub fn failing(error: Option<&str>) -> Self {
        Self {
            fd_stdout: String::new(),
            outcome: SandboxOutcome::failed(error.map(str::to_string)),
        }
    }
}

impl Default for MockRun {
    fn default() -> Self {
        Self::printing("")
    }
}

/// A workload as the mock saw it during `run`.
#[derive(Debug, Clone)]
pub struct SeenWorkload {
    pub path: PathBuf,
    pub source: String,
}

/// In-process runtime that replays scripted responses.
#[derive(Default)]
pub struct MockSandboxRuntime {
    responses: std::sync::Mutex<Vec<MockRun>>,
    seen: std::sync::Mutex<Vec<SeenWorkload>>,
    cache_clears: AtomicUsize,
}

impl MockSandboxRuntime {
    pub fn new(responses: Vec<MockRun>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            ..Default::default()
        }
    }

    /// Workloads submitted so far.
    pub fn seen(&self) -> Vec<SeenWorkload> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockRun {
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if responses.is_empty() {
            MockRun::default()
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl SandboxRuntime for MockSandboxRuntime {
    async fn run(&self, workload: &Path) -> Result<SandboxOutcome> {
        let source = tokio::fs::read_to_string(workload).await?;
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SeenWorkload {
                path: workload.to_path_buf(),
                source,
            });

        let response = self.next_response();
        if !response.fd_stdout.is_empty() {
            write_to_stdout_fd(&response.fd_stdout)?;
        }
        Ok(response.outcome)
    }

    async fn clear_cache(&self) -> Result<String> {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        Ok("Sandbox cache cleared.".to_string())
    }
}

/// Bypass Rust's stdout handle and write to whatever fd 1 currently is,
/// the way native sandbox runtimes do.
fn write_to_stdout_fd(text: &str) -> Result<()> {
    let fd = std::io::stdout().as_fd().try_clone_to_owned()?;
    let mut file = std::fs::File::from(fd);
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Factory handing out one shared [`MockSandboxRuntime`], optionally failing
/// the first few construction attempts.
pub struct MockSandboxFactory {
    runtime: Arc<MockSandboxRuntime>,
    failures_left: AtomicUsize,
    created: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockSandboxFactory {
    pub fn new(runtime: Arc<MockSandboxRuntime>) -> Self {
        Self {
            runtime,
            failures_left: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` construction attempts.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Successful constructions so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// All construction attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRuntimeFactory for MockSandboxFactory {
    async fn create(&self, _settings: &SandboxSettings) -> Result<Arc<dyn SandboxRuntime>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent first calls.
        tokio::task::yield_now().await;

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::sandbox_unavailable("mock runtime failed to start"));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.runtime.clone())
    }
}
