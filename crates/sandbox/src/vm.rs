//! VM-isolated sandbox backend.
//!
//! Source is written to a uniquely named workload file and handed to the
//! external sandbox runtime. The runtime owns isolation and resource limits;
//! no timeout is applied here. Output the runtime writes to the process-wide
//! standard output is recovered through [`StdoutCapture`].

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use code_interpreter_core::{Error, ExecutionResult, Language, Result};

use crate::capture::StdoutCapture;
use crate::output::{truncate_output, MAX_OUTPUT_BYTES};
use crate::runtime::{SandboxOutcome, SandboxRuntime};

/// Languages the sandbox runtime accepts.
pub const VM_LANGUAGES: &[Language] = &Language::ALL;

/// Sub-directory of the scratch directory holding workload files.
pub const WORKLOAD_DIR: &str = "workloads";

/// Sub-directory of the scratch directory holding stdout capture files.
pub const CAPTURE_DIR: &str = "captures";

const COMPLETED_WITHOUT_OUTPUT: &str = "Execution completed successfully.";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Backend delegating execution to a [`SandboxRuntime`].
#[derive(Debug, Clone)]
pub struct VmSandboxBackend {
    scratch_dir: PathBuf,
}

impl VmSandboxBackend {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Directory workload files are written to.
    pub fn workload_dir(&self) -> PathBuf {
        self.scratch_dir.join(WORKLOAD_DIR)
    }

    /// Directory stdout capture files are written to.
    pub fn capture_dir(&self) -> PathBuf {
        self.scratch_dir.join(CAPTURE_DIR)
    }

    /// Run `code` inside `sandbox`.
    ///
    /// The workload file is removed before this returns, whatever happened
    /// during the run.
    pub async fn run(
        &self,
        code: &str,
        language: Language,
        sandbox: &dyn SandboxRuntime,
    ) -> Result<ExecutionResult> {
        let workload = self.write_workload(code, language).await?;
        tracing::debug!(workload = %workload.path().display(), %language, "Workload written");

        let invoked = self.invoke(workload.path(), sandbox).await;

        let path = workload.path().to_path_buf();
        if let Err(e) = workload.close() {
            tracing::warn!(workload = %path.display(), error = %e, "Failed to remove workload file");
        }

        let (outcome, captured) = invoked?;
        Ok(map_outcome(outcome, &captured))
    }

    async fn write_workload(&self, code: &str, language: Language) -> Result<NamedTempFile> {
        let dir = self.workload_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let suffix = format!(".{}", language.extension());
        let mut workload = tempfile::Builder::new()
            .prefix("workload_")
            .suffix(&suffix)
            .rand_bytes(8)
            .tempfile_in(&dir)
            .map_err(|e| Error::tool_execution(format!("Failed to create workload file: {}", e)))?;
        workload.write_all(code.as_bytes())?;
        workload.flush()?;
        Ok(workload)
    }

    async fn invoke(
        &self,
        workload: &Path,
        sandbox: &dyn SandboxRuntime,
    ) -> Result<(SandboxOutcome, String)> {
        let capture = StdoutCapture::begin(&self.capture_dir()).await?;
        let outcome = sandbox.run(workload).await;
        // Restore fd 1 before looking at the outcome.
        let captured = capture.finish();
        Ok((outcome?, captured?))
    }
}

/// Normalize a runtime outcome plus captured stdout into an [`ExecutionResult`].
pub fn map_outcome(outcome: SandboxOutcome, captured: &str) -> ExecutionResult {
    if outcome.success {
        let reported = outcome
            .stdout
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let text = if !captured.is_empty() {
            captured
        } else {
            reported.unwrap_or(COMPLETED_WITHOUT_OUTPUT)
        };
        ExecutionResult::success(truncate_output(text, MAX_OUTPUT_BYTES))
    } else {
        let detail = outcome
            .error
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_ERROR);
        let detail = truncate_output(detail, MAX_OUTPUT_BYTES);
        ExecutionResult::failure(format!("Execution failed: {}", detail)).with_error_detail(detail)
    }
}
