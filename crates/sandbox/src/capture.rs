//! Process-wide standard-output capture.
//!
//! Some sandbox runtimes write execution output straight to file descriptor 1
//! instead of returning it. [`StdoutCapture`] takes exclusive ownership of
//! that descriptor for the duration of one call: it points fd 1 at a private
//! capture file and puts the saved descriptor back when dropped, so unwinding
//! and cancellation restore it too.
//!
//! fd 1 is global to the process, so capture windows are serialized by a
//! process-wide lock held for the guard's whole lifetime.

use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::Path;

use nix::libc::STDOUT_FILENO;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, MutexGuard};

use code_interpreter_core::{Error, Result};

static CAPTURE_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard redirecting fd 1 into a capture file until dropped or finished.
pub struct StdoutCapture {
    // Field order matters: restore happens in Drop, then the capture file is
    // removed, then the lock is released.
    saved: Option<OwnedFd>,
    file: NamedTempFile,
    _lock: MutexGuard<'static, ()>,
}

impl StdoutCapture {
    /// Wait for exclusive use of fd 1, then redirect it into a new capture
    /// file created inside `dir`. The directory is created if missing.
    pub async fn begin(dir: &Path) -> Result<Self> {
        let lock = CAPTURE_LOCK.lock().await;

        std::fs::create_dir_all(dir)
            .map_err(|e| Error::output_capture(format!("Failed to create capture directory: {}", e)))?;
        let file = tempfile::Builder::new()
            .prefix("stdout_")
            .suffix(".txt")
            .tempfile_in(dir)
            .map_err(|e| Error::output_capture(format!("Failed to create capture file: {}", e)))?;

        flush_stdout();
        let saved = std::io::stdout()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| Error::output_capture(format!("Failed to duplicate stdout: {}", e)))?;

        nix::unistd::dup2(file.as_file().as_raw_fd(), STDOUT_FILENO)
            .map_err(|e| Error::output_capture(format!("Failed to redirect stdout: {}", e)))?;

        tracing::trace!(capture = %file.path().display(), "stdout redirected");

        Ok(Self {
            saved: Some(saved),
            file,
            _lock: lock,
        })
    }

    /// Restore fd 1 and return everything written to it, trimmed of
    /// surrounding whitespace. The capture file is deleted afterwards.
    pub fn finish(mut self) -> Result<String> {
        self.restore()?;
        let bytes = std::fs::read(self.file.path())
            .map_err(|e| Error::output_capture(format!("Failed to read captured output: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    fn restore(&mut self) -> Result<()> {
        if let Some(saved) = &self.saved {
            flush_stdout();
            nix::unistd::dup2(saved.as_raw_fd(), STDOUT_FILENO)
                .map_err(|e| Error::output_capture(format!("Failed to restore stdout: {}", e)))?;
            self.saved = None;
            tracing::trace!("stdout restored");
        }
        Ok(())
    }
}

impl Drop for StdoutCapture {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(error = %e, "stdout could not be restored after capture");
        }
    }
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
